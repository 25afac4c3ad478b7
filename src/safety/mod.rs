//! Tiered command-safety policy.
//!
//! This module decides whether a command may run in a session:
//! - `SafetyTier` / `SafetyPolicy`: immutable tier presets plus per-session
//!   field overrides
//! - `SafetyEngine`: check, approval workflow, and guarded execution
//! - `SafetyViolation`: append-only bounded audit log
//!
//! Policy verdicts are values (`SafetyCheck`, `ExecutionOutcome`): denials
//! fail the outcome rather than erroring. The one typed error in the happy
//! path is `ApprovalRequired`, raised when a command still needs a human
//! decision; it carries the freshly minted approval id.

mod engine;
mod policy;
mod types;

pub use engine::SafetyEngine;
pub use policy::{PolicyOverride, SafetyPolicy, SafetyTier};
pub use types::{
    CommandApproval, ExecutionOutcome, SafetyCheck, SafetyViolation, ViolationKind,
};
