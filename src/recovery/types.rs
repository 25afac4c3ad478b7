use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Crash,
    Network,
    CommandFailed,
    SessionLost,
}

impl ErrorKind {
    /// Whether this kind of failure is worth a recovery attempt at all.
    /// A lost session can only be recreated by the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SessionLost)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Crash => write!(f, "crash"),
            Self::Network => write!(f, "network"),
            Self::CommandFailed => write!(f, "command_failed"),
            Self::SessionLost => write!(f, "session_lost"),
        }
    }
}

/// One classified failure observation for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub session_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    pub retry_count: u32,
    pub recoverable: bool,
}

impl ErrorContext {
    pub fn new(session_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            message: message.into(),
            at: Utc::now(),
            retry_count: 0,
            recoverable: kind.is_recoverable(),
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Rolling health record for one session, created lazily on the first
/// observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    pub session_id: String,
    pub healthy: bool,
    pub last_check: DateTime<Utc>,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub recent_errors: Vec<ErrorContext>,
}

impl SessionHealth {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            healthy: true,
            last_check: Utc::now(),
            consecutive_failures: 0,
            recent_errors: Vec::new(),
        }
    }

    pub fn mark_healthy(&mut self) {
        self.healthy = true;
        self.consecutive_failures = 0;
        self.last_check = Utc::now();
    }

    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
        self.consecutive_failures += 1;
        self.last_check = Utc::now();
    }

    pub fn record_error(&mut self, error: ErrorContext, cap: usize) {
        self.recent_errors.push(error);
        if self.recent_errors.len() > cap {
            let excess = self.recent_errors.len() - cap;
            self.recent_errors.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lost_is_not_recoverable() {
        assert!(!ErrorKind::SessionLost.is_recoverable());
        let ctx = ErrorContext::new("s1", ErrorKind::SessionLost, "gone");
        assert!(!ctx.recoverable);
    }

    #[test]
    fn test_other_kinds_are_recoverable() {
        for kind in [
            ErrorKind::Timeout,
            ErrorKind::Crash,
            ErrorKind::Network,
            ErrorKind::CommandFailed,
        ] {
            assert!(kind.is_recoverable(), "{} should be recoverable", kind);
        }
    }

    #[test]
    fn test_health_failure_counting() {
        let mut health = SessionHealth::new("s1");
        health.mark_unhealthy();
        health.mark_unhealthy();
        assert_eq!(health.consecutive_failures, 2);
        health.mark_healthy();
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.healthy);
    }

    #[test]
    fn test_health_error_history_bounded() {
        let mut health = SessionHealth::new("s1");
        for i in 0..10 {
            health.record_error(
                ErrorContext::new("s1", ErrorKind::Network, format!("err {}", i)),
                5,
            );
        }
        assert_eq!(health.recent_errors.len(), 5);
        assert_eq!(health.recent_errors.last().unwrap().message, "err 9");
    }
}
