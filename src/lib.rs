//! termfleet: orchestration core for a fleet of terminal sessions.
//!
//! An automation client delegates work to long-lived terminal sessions;
//! this crate coordinates them: tracking identity and lifecycle, enforcing
//! a tiered command-safety policy, distributing compound tasks, recovering
//! from failures, and monitoring resource usage. The terminal application
//! itself sits behind the [`terminal::TerminalBackend`] trait.

pub mod config;
pub mod distribution;
pub mod error;
pub mod monitor;
pub mod progress;
pub mod recovery;
pub mod safety;
pub mod session;
pub mod terminal;
pub mod utils;

pub use config::FleetConfig;
pub use distribution::{DistributedTask, DistributionEngine, Subtask, SubtaskSpec};
pub use error::{FleetError, Result};
pub use monitor::{PerformanceAlert, PerformanceMonitor};
pub use progress::{AggregatedProgress, OverallStatus, ProgressAggregator, ProgressStatus};
pub use recovery::{ErrorContext, ErrorKind, RecoveryEngine, SessionHealth};
pub use safety::{PolicyOverride, SafetyEngine, SafetyPolicy, SafetyTier};
pub use session::{Session, SessionRegistry, SessionState};
pub use terminal::{MockBackend, TerminalBackend};
