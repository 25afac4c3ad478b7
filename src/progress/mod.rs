//! Multi-session progress aggregation.
//!
//! Tracks per-session progress records for an arbitrary task grouping,
//! independent of how the work was assigned, and synthesizes a
//! deterministic human-readable report. The overall status is a pure
//! function of the per-session status multiset.

mod aggregator;
mod types;

pub use aggregator::ProgressAggregator;
pub use types::{
    derive_overall, AggregatedProgress, OverallStatus, ProgressStatus, ProgressUpdate,
    TaskProgress,
};
