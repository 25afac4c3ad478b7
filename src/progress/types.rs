use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    Pending,
    InProgress,
    /// Some sessions completed, the rest ended without completing (and
    /// nothing is pending or running).
    Partial,
    Completed,
    Failed,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Partial => write!(f, "partial"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Derives the overall status from per-session statuses. Pure function of
/// the status multiset; ordering of the input is irrelevant.
///
/// Precedence: all completed wins, then any failure, then anything still
/// moving (running, or completed work with pending work behind it). A mix
/// of completed and cancelled rows with nothing outstanding is `Partial`.
pub fn derive_overall(statuses: &[ProgressStatus]) -> OverallStatus {
    if statuses.is_empty() {
        return OverallStatus::Pending;
    }

    let completed = statuses.iter().filter(|s| **s == ProgressStatus::Completed).count();
    if completed == statuses.len() {
        return OverallStatus::Completed;
    }
    if statuses.contains(&ProgressStatus::Failed) {
        return OverallStatus::Failed;
    }
    if statuses.contains(&ProgressStatus::InProgress) {
        return OverallStatus::InProgress;
    }
    if statuses.contains(&ProgressStatus::Pending) {
        return if completed > 0 {
            OverallStatus::InProgress
        } else {
            OverallStatus::Pending
        };
    }
    // Only completed and cancelled rows remain.
    if completed > 0 {
        OverallStatus::Partial
    } else {
        OverallStatus::Failed
    }
}

/// Progress record for one session within an aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub session_id: String,
    pub task_id: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub output: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskProgress {
    pub fn new(session_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            status: ProgressStatus::Pending,
            output: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Partial update applied to one session's progress record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressUpdate {
    pub status: Option<ProgressStatus>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    pub fn status(status: ProgressStatus) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(ProgressStatus::Failed),
            error: Some(error.into()),
        }
    }
}

/// Tracked group of per-session progress records sharing one logical
/// parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedProgress {
    pub id: String,
    pub main_task_id: String,
    pub sessions: HashMap<String, TaskProgress>,
    pub overall: OverallStatus,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProgressStatus::*;

    #[test]
    fn test_derive_empty_is_pending() {
        assert_eq!(derive_overall(&[]), OverallStatus::Pending);
    }

    #[test]
    fn test_derive_all_completed() {
        assert_eq!(derive_overall(&[Completed, Completed]), OverallStatus::Completed);
    }

    #[test]
    fn test_derive_any_failed_wins() {
        assert_eq!(derive_overall(&[Completed, Failed]), OverallStatus::Failed);
        assert_eq!(derive_overall(&[Failed, InProgress]), OverallStatus::Failed);
    }

    #[test]
    fn test_derive_completed_plus_pending_is_in_progress() {
        // Partial requires nothing still pending or running.
        assert_eq!(derive_overall(&[Completed, Pending]), OverallStatus::InProgress);
    }

    #[test]
    fn test_derive_completed_plus_cancelled_is_partial() {
        assert_eq!(derive_overall(&[Completed, Cancelled]), OverallStatus::Partial);
    }

    #[test]
    fn test_derive_is_order_invariant() {
        let statuses = [Completed, Pending, InProgress, Completed];
        let expected = derive_overall(&statuses);
        // All rotations of the same multiset must agree.
        for rotation in 0..statuses.len() {
            let mut rotated = statuses.to_vec();
            rotated.rotate_left(rotation);
            assert_eq!(derive_overall(&rotated), expected);
        }
    }
}
