pub mod chat;
pub mod health;
pub mod metrics;
pub mod signaling;
pub mod token;
pub mod upload;

pub use chat::chat_socket;
pub use health::{health_check, readiness_check, root};
pub use metrics::metrics_endpoint;
pub use signaling::webrtc_offer;
pub use token::create_token;
pub use upload::upload_disabled;
