use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Handle returned by the backend for a newly created session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: String,
    pub window_ref: String,
    pub tab_ref: String,
}

/// One row of the backend's live session listing.
///
/// Rows with an empty id are considered malformed and skipped by the
/// registry rather than failing the whole enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListing {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tty: Option<String>,
    #[serde(default)]
    pub is_processing: bool,
}

/// Per-process resource sample for a session's tty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub command: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Capability contract the core consumes from the terminal-automation layer.
///
/// `write` is fire-and-forget: success means the text was handed to the
/// terminal, not that the command finished. `read` returns at most the
/// requested number of trailing lines of the screen buffer.
#[async_trait]
pub trait TerminalBackend: Send + Sync {
    async fn create_session(
        &self,
        name: Option<&str>,
        profile: Option<&str>,
    ) -> Result<SessionHandle>;

    async fn list_sessions(&self) -> Result<Vec<SessionListing>>;

    async fn write(&self, session_id: &str, text: &str) -> Result<()>;

    async fn read(&self, session_id: &str, max_lines: usize) -> Result<String>;

    async fn send_control(&self, session_id: &str, ch: char) -> Result<()>;

    async fn close_session(&self, session_id: &str) -> Result<()>;

    async fn process_snapshot(&self, tty: &str) -> Result<Vec<ProcessSample>>;
}
