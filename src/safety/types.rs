use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::policy::SafetyTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    LengthExceeded,
    BlockedSubstring,
    DangerousPattern,
    NotAllowed,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthExceeded => write!(f, "length_exceeded"),
            Self::BlockedSubstring => write!(f, "blocked_command"),
            Self::DangerousPattern => write!(f, "dangerous_pattern"),
            Self::NotAllowed => write!(f, "not_allowed"),
        }
    }
}

/// Immutable audit record of one rejected command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub session_id: String,
    /// Offending command, truncated when the violation is a length overflow.
    pub command: String,
    pub kind: ViolationKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SafetyViolation {
    pub fn new(
        session_id: impl Into<String>,
        command: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            command: command.into(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Verdict of a policy check. Not an error: callers branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub safe: bool,
    pub requires_approval: bool,
    pub violation: Option<ViolationKind>,
    pub message: Option<String>,
}

impl SafetyCheck {
    pub fn allowed() -> Self {
        Self {
            safe: true,
            requires_approval: false,
            violation: None,
            message: None,
        }
    }

    pub fn needs_approval() -> Self {
        Self {
            safe: true,
            requires_approval: true,
            violation: None,
            message: None,
        }
    }

    pub fn denied(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            safe: false,
            requires_approval: false,
            violation: Some(kind),
            message: Some(message.into()),
        }
    }
}

/// Pending (or granted) human decision on one command.
///
/// Rejection deletes the record; approval keeps it so the id can authorize
/// exactly one subsequent execution. `consumed` flips on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandApproval {
    pub id: String,
    pub session_id: String,
    pub command: String,
    pub tier: SafetyTier,
    pub created_at: DateTime<Utc>,
    pub approved: bool,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub consumed: bool,
}

impl CommandApproval {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        command: impl Into<String>,
        tier: SafetyTier,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            command: command.into(),
            tier,
            created_at: Utc::now(),
            approved: false,
            approved_by: None,
            rejection_reason: None,
            consumed: false,
        }
    }
}

/// Result of a guarded execution attempt. Denials come back as a failed
/// outcome; an unapproved command is refused before execution with
/// `FleetError::ApprovalRequired` carrying the approval id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}
