mod dispatch;
mod preprocess;
mod sampler;

pub use dispatch::{DispatchStatsSnapshot, DispatchWorker, InferenceDispatchQueue};
pub use preprocess::{decode_image, FaceDetector, FaceRegion, FramePreprocessor};
pub use sampler::{forward_results, FrameSampler, RateGate, SamplerReport, DEFAULT_PROMPT};
