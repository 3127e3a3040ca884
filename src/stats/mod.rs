//! Metrics counters for the read node

pub mod metrics;

pub use metrics::{MetricsSnapshot, ReadServerMetrics};
