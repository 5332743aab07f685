pub mod logging;
pub mod metrics;

pub use logging::StructuredLogger;
pub use metrics::{global_metrics, handle_gauges, ConnectionMetrics, Gauge, Metrics, QueryMetrics};
