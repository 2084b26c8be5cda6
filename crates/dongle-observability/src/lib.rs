//! Observability for the dongle core.
//!
//! - [`RunningStat`]: incremental mean / sample variance accumulator.
//! - [`telemetry`]: structured event schema, observer trait, ring buffer.
//! - [`metrics`]: log-store counters and the scan/download statistics
//!   reported periodically by the device.

pub mod metrics;
pub mod stat;
pub mod telemetry;

pub use metrics::{
    DownloadAggregate, DownloadMetrics, DownloadSample, LogMetrics, LogMetricsSnapshot,
    ScanStats,
};
pub use stat::RunningStat;
pub use telemetry::{
    DongleTelemetryEvent, NoOpObserver, TelemetryObserver, TelemetryRingBuffer,
};
