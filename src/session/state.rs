use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Initializing,
    Ready,
    Busy,
    Waiting,
    Error,
    Closing,
}

impl SessionState {
    pub fn allowed_transitions(&self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Initializing => &[Ready, Error, Closing],
            Ready => &[Busy, Waiting, Error, Closing],
            Busy => &[Ready, Waiting, Error, Closing],
            Waiting => &[Ready, Busy, Error, Closing],
            // Recovery may restore an errored session to service.
            Error => &[Ready, Closing],
            Closing => &[],
        }
    }

    pub fn can_transition_to(&self, target: SessionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing)
    }

    /// True when the session can accept new work.
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Busy | SessionState::Waiting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Waiting => "waiting",
            Self::Error => "error",
            Self::Closing => "closing",
        };
        write!(f, "{}", s)
    }
}

/// Audit record of one applied transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: SessionState, to: SessionState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionState::Initializing.can_transition_to(SessionState::Ready));
        assert!(SessionState::Ready.can_transition_to(SessionState::Busy));
        assert!(SessionState::Busy.can_transition_to(SessionState::Ready));
        assert!(SessionState::Error.can_transition_to(SessionState::Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!SessionState::Closing.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Initializing.can_transition_to(SessionState::Busy));
        assert!(!SessionState::Error.can_transition_to(SessionState::Busy));
    }

    #[test]
    fn test_terminal_state() {
        assert!(SessionState::Closing.is_terminal());
        assert!(!SessionState::Error.is_terminal());
        assert!(SessionState::Closing.allowed_transitions().is_empty());
    }

    #[test]
    fn test_idle_and_active() {
        assert!(SessionState::Ready.is_idle());
        assert!(!SessionState::Busy.is_idle());
        assert!(SessionState::Busy.is_active());
        assert!(SessionState::Waiting.is_active());
    }
}
