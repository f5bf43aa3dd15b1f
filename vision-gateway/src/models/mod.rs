pub mod chat;
pub mod frame;
pub mod inference;
pub mod messages;
pub mod session;

pub use chat::{ChatMessage, ChatRole, MessageKind};
pub use frame::{FrameError, ImageBuffer, PixelFormat, VideoFrame};
pub use inference::{InferenceRequest, InferenceResult, APOLOGY_TEXT};
pub use messages::{InboundMessage, OutboundMessage};
pub use session::{DeliveryHandle, Session};
