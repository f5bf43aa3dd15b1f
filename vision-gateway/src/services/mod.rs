pub mod auth;
pub mod metrics;
pub mod providers;
pub mod registry;

pub use auth::TokenService;
pub use metrics::{GatewayMetrics, MetricsAggregator};
pub use registry::{SessionRegistry, SessionStats};
