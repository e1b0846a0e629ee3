pub mod health;
pub mod logging;
pub mod metrics;
pub mod tracing;

#[cfg(test)]
mod tests;

pub use health::{ComponentHealth, HealthResponse, HealthService, HealthStatus};
pub use logging::LoggingService;
pub use metrics::{Metrics, MetricsRegistry};
pub use self::tracing::init_tracing;
