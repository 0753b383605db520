pub mod access_log;
pub mod queue;
pub mod stats;

#[cfg(feature = "prometheus")]
pub mod metrics;

pub use access_log::{AccessLogEntry, AccessLogObserver};
pub use queue::QueuedObserver;
pub use stats::StatsTracker;

#[cfg(feature = "prometheus")]
pub use metrics::MetricsCollector;
