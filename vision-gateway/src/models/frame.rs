//! Raw image buffers and timestamped video frames.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Channel order delivered by video transports.
    Bgr24,
    /// Channel order expected by the inference backend.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer length {actual} does not match {width}x{height} ({expected} bytes expected)")]
    LengthMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Image has zero area")]
    Empty,
}

/// Packed 8-bit pixel data with its geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl ImageBuffer {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Uniformly coloured image, handy for synthetic frames.
    pub fn filled(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixel: [u8; 3],
    ) -> Result<Self, FrameError> {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, format, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// A frame pulled off a transport track.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: ImageBuffer,
    pub captured_at: Instant,
}

impl VideoFrame {
    pub fn new(image: ImageBuffer) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let err = ImageBuffer::new(2, 2, PixelFormat::Bgr24, vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn test_rejects_zero_area() {
        assert_eq!(
            ImageBuffer::new(0, 4, PixelFormat::Rgb24, vec![]).unwrap_err(),
            FrameError::Empty
        );
    }

    #[test]
    fn test_filled_repeats_pixel() {
        let img = ImageBuffer::filled(2, 1, PixelFormat::Bgr24, [1, 2, 3]).unwrap();
        assert_eq!(img.data(), &[1, 2, 3, 1, 2, 3]);
    }
}
