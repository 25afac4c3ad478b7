//! Boundary to the external terminal-automation layer.
//!
//! The fleet core never talks to a terminal application directly; everything
//! goes through the [`TerminalBackend`] trait so the scripting bridge can be
//! swapped out (and mocked in tests). The [`SettleStrategy`] abstracts the
//! wait between writing a command and reading its output.

mod backend;
mod mock;
mod settle;

pub use backend::{ProcessSample, SessionHandle, SessionListing, TerminalBackend};
pub use mock::MockBackend;
pub use settle::{FixedDelay, PollUntilStable, SettleStrategy};
