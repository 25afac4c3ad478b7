use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No idle sessions available for task distribution")]
    NoIdleSessions,

    #[error("Invalid state transition: {from} -> {to} (allowed: {allowed})")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Terminal backend error: {0}")]
    Collaborator(String),

    #[error("Command requires approval: {approval_id}")]
    ApprovalRequired { approval_id: String },

    #[error("Approval invalid: {0}")]
    ApprovalInvalid(String),

    #[error("Operation timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("Unrecoverable failure: {0}")]
    Unrecoverable(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Aggregation not found: {0}")]
    AggregationNotFound(String),

    #[error("Subtask dependency cycle involving: {0}")]
    DependencyCycle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FleetError {
    /// Extracts the embedded approval id when a command was parked for approval.
    pub fn approval_id(&self) -> Option<&str> {
        match self {
            Self::ApprovalRequired { approval_id } => Some(approval_id),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
