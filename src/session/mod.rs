//! Session identity and lifecycle.
//!
//! Core domain types for fleet sessions:
//! - `SessionState`: lifecycle state with an explicit transition table
//! - `Session`: bookkeeping record for one terminal session
//! - `SessionRegistry`: sole owner of session state transitions

mod registry;
mod state;
mod types;

pub use registry::SessionRegistry;
pub use state::{SessionState, StateTransition};
pub use types::Session;
