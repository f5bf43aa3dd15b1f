//! Frame preparation before a frame is queued for inference.

use crate::models::{FrameError, ImageBuffer, PixelFormat};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;

const BLUR_SIGMA: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Locates faces to redact. Implementations run on the sampling task, so
/// they should be quick.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<FaceRegion>>;
}

/// Resizes to the model input size, converts BGR to RGB and optionally blurs
/// faces.
pub struct FramePreprocessor {
    width: u32,
    height: u32,
    face_detector: Option<Arc<dyn FaceDetector>>,
}

impl FramePreprocessor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            face_detector: None,
        }
    }

    pub fn with_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.face_detector = Some(detector);
        self
    }

    pub fn process(&self, frame: &ImageBuffer) -> Result<ImageBuffer, FrameError> {
        let raw = RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
            .ok_or(FrameError::LengthMismatch {
                width: frame.width(),
                height: frame.height(),
                expected: frame.width() as usize * frame.height() as usize * 3,
                actual: frame.data().len(),
            })?;

        let mut resized = if raw.dimensions() == (self.width, self.height) {
            raw
        } else {
            imageops::resize(&raw, self.width, self.height, FilterType::Triangle)
        };

        if frame.format() == PixelFormat::Bgr24 {
            for px in resized.pixels_mut() {
                px.0.swap(0, 2);
            }
        }

        if let Some(detector) = &self.face_detector {
            redact_faces(&mut resized, detector.as_ref());
        }

        ImageBuffer::new(
            self.width,
            self.height,
            PixelFormat::Rgb24,
            resized.into_raw(),
        )
    }
}

/// Best effort: a detector error leaves the frame untouched.
fn redact_faces(image: &mut RgbImage, detector: &dyn FaceDetector) {
    let regions = match detector.detect(image) {
        Ok(regions) => regions,
        Err(e) => {
            tracing::warn!(error = %e, "Face blur failed");
            return;
        }
    };

    let (img_w, img_h) = image.dimensions();
    for region in regions {
        if region.x >= img_w || region.y >= img_h {
            continue;
        }
        let w = region.width.min(img_w - region.x);
        let h = region.height.min(img_h - region.y);
        if w == 0 || h == 0 {
            continue;
        }
        let patch = imageops::crop_imm(image, region.x, region.y, w, h).to_image();
        let blurred = imageops::blur(&patch, BLUR_SIGMA);
        imageops::replace(image, &blurred, region.x, region.y);
    }
}

/// Decodes an encoded still (PNG, JPEG) into a BGR buffer, the layout video
/// transports deliver.
pub fn decode_image(bytes: &[u8]) -> Result<ImageBuffer, anyhow::Error> {
    let mut rgb = image::load_from_memory(bytes)?.to_rgb8();
    for px in rgb.pixels_mut() {
        px.0.swap(0, 2);
    }
    let (width, height) = rgb.dimensions();
    Ok(ImageBuffer::new(
        width,
        height,
        PixelFormat::Bgr24,
        rgb.into_raw(),
    )?)
}
