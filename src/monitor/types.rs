use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamped resource snapshot for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Estimated from time since the session last executed a command; a
    /// crude proxy in the absence of a real completion signal.
    pub response_time_ms: u64,
    pub command_count: u64,
    pub error_count: u64,
    pub healthy: bool,
}

/// Fleet-wide aggregate for one sampling tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub at: DateTime<Utc>,
    pub session_count: usize,
    pub total_cpu_percent: f64,
    pub total_memory_percent: f64,
    pub average_response_time_ms: u64,
    /// Commands observed in the sliding one-minute window.
    pub commands_per_minute: u64,
    /// Errors per command over the same window, 0.0..=1.0.
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Cpu,
    Memory,
    ResponseTime,
    ErrorRate,
}

/// One threshold breach. Append-only, bounded, insertion-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    pub session_id: Option<String>,
    pub value: f64,
    pub threshold: f64,
    pub at: DateTime<Utc>,
}

impl PerformanceAlert {
    pub fn new(
        severity: AlertSeverity,
        category: AlertCategory,
        message: impl Into<String>,
        value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            session_id: None,
            value,
            threshold,
            at: Utc::now(),
        }
    }

    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
