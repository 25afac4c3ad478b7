//! Failure detection and recovery.
//!
//! This module handles:
//! - Typed classification of session failures (`ErrorKind` / `ErrorContext`)
//! - Per-kind recovery policies with interrupt/backoff/probe steps
//! - Retry with timeout and exponential backoff around arbitrary operations
//! - Periodic health sweeps feeding per-session `SessionHealth`

mod engine;
mod types;

pub use engine::RecoveryEngine;
pub use types::{ErrorContext, ErrorKind, SessionHealth};
