use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use super::types::{
    derive_overall, AggregatedProgress, OverallStatus, ProgressStatus, ProgressUpdate,
    TaskProgress,
};
use crate::error::{FleetError, Result};
use crate::utils::short_id;

/// Tracks per-session progress for arbitrary task groupings and renders
/// the canonical text report. Aggregations are created explicitly by the
/// caller; this component knows nothing about how work was distributed.
#[derive(Default)]
pub struct ProgressAggregator {
    aggregations: RwLock<HashMap<String, AggregatedProgress>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one pending progress record per session and returns the
    /// aggregation id.
    pub fn create(&self, main_task_id: &str, session_ids: &[String]) -> String {
        let id = format!("agg-{}", short_id());
        let sessions = session_ids
            .iter()
            .map(|sid| {
                (
                    sid.clone(),
                    TaskProgress::new(sid, format!("{}-{}", main_task_id, sid)),
                )
            })
            .collect();

        let aggregation = AggregatedProgress {
            id: id.clone(),
            main_task_id: main_task_id.to_string(),
            sessions,
            overall: OverallStatus::Pending,
            summary: None,
            created_at: Utc::now(),
        };

        debug!(aggregation_id = %id, main_task_id, sessions = session_ids.len(), "aggregation created");
        self.aggregations.write().insert(id.clone(), aggregation);
        id
    }

    /// Applies a partial update to one session's record and re-derives the
    /// overall status.
    pub fn update(&self, agg_id: &str, session_id: &str, update: ProgressUpdate) -> Result<()> {
        let mut aggregations = self.aggregations.write();
        let aggregation = aggregations
            .get_mut(agg_id)
            .ok_or_else(|| FleetError::AggregationNotFound(agg_id.to_string()))?;
        let progress = aggregation
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;

        if let Some(status) = update.status {
            if status == ProgressStatus::InProgress && progress.started_at.is_none() {
                progress.started_at = Some(Utc::now());
            }
            if status.is_terminal() && progress.completed_at.is_none() {
                progress.completed_at = Some(Utc::now());
            }
            progress.status = status;
        }
        if update.error.is_some() {
            progress.error = update.error;
        }

        Self::refresh_overall(aggregation);
        Ok(())
    }

    /// Appends one output line to a session's record.
    pub fn add_output(&self, agg_id: &str, session_id: &str, line: impl Into<String>) -> Result<()> {
        let mut aggregations = self.aggregations.write();
        let aggregation = aggregations
            .get_mut(agg_id)
            .ok_or_else(|| FleetError::AggregationNotFound(agg_id.to_string()))?;
        let progress = aggregation
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;

        progress.output.push(line.into());
        Ok(())
    }

    pub fn set_summary(&self, agg_id: &str, summary: impl Into<String>) -> Result<()> {
        let mut aggregations = self.aggregations.write();
        let aggregation = aggregations
            .get_mut(agg_id)
            .ok_or_else(|| FleetError::AggregationNotFound(agg_id.to_string()))?;
        aggregation.summary = Some(summary.into());
        Ok(())
    }

    pub fn get(&self, agg_id: &str) -> Result<AggregatedProgress> {
        self.aggregations
            .read()
            .get(agg_id)
            .cloned()
            .ok_or_else(|| FleetError::AggregationNotFound(agg_id.to_string()))
    }

    /// Renders the canonical report. Structure is deterministic (sessions
    /// sorted by id) so callers may parse it.
    pub fn synthesize(&self, agg_id: &str) -> Result<String> {
        let aggregation = self.get(agg_id)?;

        let mut report = String::new();
        let _ = writeln!(
            report,
            "=== Aggregated results for {} ===",
            aggregation.main_task_id
        );
        let _ = writeln!(report, "Overall status: {}", aggregation.overall);

        let mut session_ids: Vec<&String> = aggregation.sessions.keys().collect();
        session_ids.sort();

        for session_id in session_ids {
            let progress = &aggregation.sessions[session_id];
            let _ = writeln!(report);
            let _ = writeln!(report, "--- Session {} [{}] ---", session_id, progress.status);
            if let Some(error) = &progress.error {
                let _ = writeln!(report, "Error: {}", error);
            }
            for line in &progress.output {
                let _ = writeln!(report, "{}", line);
            }
        }

        if let Some(summary) = &aggregation.summary {
            let _ = writeln!(report);
            let _ = writeln!(report, "Summary: {}", summary);
        }

        Ok(report)
    }

    /// One-line derived statistic; no external calls.
    pub fn summary_line(&self, agg_id: &str) -> Result<String> {
        let aggregation = self.get(agg_id)?;
        let total = aggregation.sessions.len();
        let completed = aggregation
            .sessions
            .values()
            .filter(|p| p.status == ProgressStatus::Completed)
            .count();
        let output_lines: usize = aggregation.sessions.values().map(|p| p.output.len()).sum();
        let elapsed_minutes = (Utc::now() - aggregation.created_at).num_minutes().max(0);

        Ok(format!(
            "{}/{} sessions completed, {}m elapsed, {} output lines",
            completed, total, elapsed_minutes, output_lines
        ))
    }

    /// Drops aggregations created before the cutoff.
    pub fn cleanup(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        self.aggregations
            .write()
            .retain(|_, agg| agg.created_at >= cutoff);
    }

    fn refresh_overall(aggregation: &mut AggregatedProgress) {
        let statuses: Vec<ProgressStatus> =
            aggregation.sessions.values().map(|p| p.status).collect();
        aggregation.overall = derive_overall(&statuses);
    }
}
