//! Fleet performance monitoring.
//!
//! Samples per-session resource usage on an interval, keeps bounded metric
//! histories, raises threshold alerts, and offers heuristic optimization
//! suggestions. Independent of the task flow; other components feed it via
//! `record_command` / `record_error`.

mod monitor;
mod types;

pub use monitor::PerformanceMonitor;
pub use types::{
    AlertCategory, AlertSeverity, PerformanceAlert, PerformanceMetrics, SystemMetrics,
};
