//! Compound-task distribution across the session fleet.
//!
//! Splits a compound task into subtasks, assigns them round-robin over
//! idle sessions (dependency waves first, see `DistributionEngine`),
//! executes each session's queue sequentially while sessions run
//! concurrently, and records outcomes.

mod engine;
mod types;

pub use engine::DistributionEngine;
pub use types::{
    DistributedTask, DistributedTaskStatus, Subtask, SubtaskSpec, SubtaskStatus,
};
