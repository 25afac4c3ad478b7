use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::types::{
    DistributedTask, DistributedTaskStatus, Subtask, SubtaskSpec, SubtaskStatus,
};
use crate::error::{FleetError, Result};
use crate::progress::{ProgressAggregator, ProgressStatus, ProgressUpdate};
use crate::recovery::{ErrorKind, RecoveryEngine};
use crate::safety::SafetyEngine;
use crate::session::{SessionRegistry, SessionState};
use crate::utils::short_id;

/// Splits compound tasks into subtasks and fans them out across idle
/// sessions.
///
/// Dependencies are enforced: subtasks are layered into topological waves
/// and a wave only starts once the previous one has finished. Within the
/// concatenated wave order, assignment is round-robin over the idle
/// sessions, so a dependency-free task degenerates to plain round-robin.
/// One session's queue runs sequentially; sessions run concurrently.
pub struct DistributionEngine {
    registry: Arc<SessionRegistry>,
    safety: Arc<SafetyEngine>,
    recovery: Arc<RecoveryEngine>,
    aggregator: Option<Arc<ProgressAggregator>>,
    tasks: RwLock<HashMap<String, DistributedTask>>,
    aggregations: RwLock<HashMap<String, String>>,
}

impl DistributionEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        safety: Arc<SafetyEngine>,
        recovery: Arc<RecoveryEngine>,
    ) -> Self {
        Self {
            registry,
            safety,
            recovery,
            aggregator: None,
            tasks: RwLock::new(HashMap::new()),
            aggregations: RwLock::new(HashMap::new()),
        }
    }

    /// Mirrors execution outcomes into a progress aggregation per task.
    pub fn with_aggregator(mut self, aggregator: Arc<ProgressAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Distributes independent subtasks (no dependency wiring).
    pub async fn distribute(
        &self,
        prompt: &str,
        subtask_prompts: Vec<String>,
    ) -> Result<DistributedTask> {
        let specs = subtask_prompts.into_iter().map(SubtaskSpec::new).collect();
        self.distribute_with_dependencies(prompt, specs).await
    }

    /// Distributes subtasks honoring their dependency graph, then executes
    /// them and returns the finished task record.
    pub async fn distribute_with_dependencies(
        &self,
        prompt: &str,
        specs: Vec<SubtaskSpec>,
    ) -> Result<DistributedTask> {
        if specs.is_empty() {
            return Err(FleetError::Config("task has no subtasks".to_string()));
        }

        let waves = topological_waves(&specs)?;

        let idle = self.registry.idle_sessions();
        if idle.is_empty() {
            return Err(FleetError::NoIdleSessions);
        }

        let task_id = format!("task-{}", short_id());
        let mut task = DistributedTask::new(&task_id, prompt);
        for (idx, spec) in specs.iter().enumerate() {
            let mut subtask = Subtask::new(format!("{}-s{}", task_id, idx + 1), &spec.prompt);
            subtask.dependencies = spec
                .depends_on
                .iter()
                .map(|dep| format!("{}-s{}", task_id, dep + 1))
                .collect();
            task.subtasks.push(subtask);
        }

        // Round-robin with a cumulative index across waves.
        let mut cursor = 0usize;
        for wave in &waves {
            for &idx in wave {
                let session = &idle[cursor % idle.len()];
                cursor += 1;
                task.subtasks[idx].assigned_session = Some(session.id.clone());
                task.subtasks[idx].status = SubtaskStatus::Assigned;
            }
        }

        task.status = DistributedTaskStatus::InProgress;
        info!(
            task_id = %task.id,
            subtasks = task.subtasks.len(),
            sessions = idle.len(),
            waves = waves.len(),
            "task distributed"
        );

        let agg_id = self.aggregator.as_ref().map(|agg| {
            let session_ids: Vec<String> = task
                .subtasks
                .iter()
                .filter_map(|s| s.assigned_session.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            agg.create(&task.id, &session_ids)
        });
        if let Some(agg_id) = &agg_id {
            self.aggregations.write().insert(task.id.clone(), agg_id.clone());
        }

        self.tasks.write().insert(task.id.clone(), task.clone());

        self.execute_waves(&task.id, &task, &waves, agg_id.as_deref()).await;

        self.finalize(&task.id, agg_id.as_deref())
    }

    async fn execute_waves(
        &self,
        task_id: &str,
        task: &DistributedTask,
        waves: &[Vec<usize>],
        agg_id: Option<&str>,
    ) {
        let mut failed_sessions: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        // Sessions owning at least one failed subtask. Kept apart from
        // `failed_sessions`: a cross-session dependency abort must not
        // poison the owning session's later queue, but it still disqualifies
        // the session from the completion sweep below.
        let mut failed_rows: HashSet<String> = HashSet::new();

        for wave in waves {
            // Group this wave's subtasks into per-session queues.
            let mut queues: Vec<(String, Vec<(String, String)>)> = Vec::new();
            for &idx in wave {
                let subtask = &task.subtasks[idx];
                let session_id = subtask
                    .assigned_session
                    .clone()
                    .expect("assigned during distribution");

                if failed_sessions.contains(&session_id) {
                    self.record_failure(
                        task_id,
                        &subtask.id,
                        &session_id,
                        "aborted: earlier subtask in this session's queue failed",
                        agg_id,
                    );
                    failed.insert(subtask.id.clone());
                    failed_rows.insert(session_id.clone());
                    continue;
                }
                if subtask.dependencies.iter().any(|dep| failed.contains(dep)) {
                    self.record_failure(
                        task_id,
                        &subtask.id,
                        &session_id,
                        "aborted: dependency failed",
                        agg_id,
                    );
                    failed.insert(subtask.id.clone());
                    failed_rows.insert(session_id.clone());
                    continue;
                }

                match queues.iter_mut().find(|(sid, _)| *sid == session_id) {
                    Some((_, queue)) => queue.push((subtask.id.clone(), subtask.prompt.clone())),
                    None => queues.push((
                        session_id,
                        vec![(subtask.id.clone(), subtask.prompt.clone())],
                    )),
                }
            }

            // Mark everything queued in this wave as running.
            for (session_id, queue) in &queues {
                for (subtask_id, _) in queue {
                    self.mark_running(task_id, subtask_id);
                }
                if let (Some(agg), Some(agg_id)) = (&self.aggregator, agg_id) {
                    let _ = agg.update(
                        agg_id,
                        session_id,
                        ProgressUpdate::status(ProgressStatus::InProgress),
                    );
                }
            }

            let runs = queues.into_iter().map(|(session_id, queue)| {
                let registry = Arc::clone(&self.registry);
                let safety = Arc::clone(&self.safety);
                let recovery = Arc::clone(&self.recovery);
                tokio::spawn(run_session_queue(
                    registry, safety, recovery, session_id, queue,
                ))
            });

            for joined in join_all(runs).await {
                let (session_id, outcomes) = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "session queue task panicked");
                        continue;
                    }
                };
                for (subtask_id, outcome) in outcomes {
                    match outcome {
                        Ok(output) => {
                            completed.insert(subtask_id.clone());
                            self.record_success(task_id, &subtask_id, &session_id, &output, agg_id);
                        }
                        Err(error) => {
                            failed.insert(subtask_id.clone());
                            failed_sessions.insert(session_id.clone());
                            failed_rows.insert(session_id.clone());
                            self.record_failure(task_id, &subtask_id, &session_id, &error, agg_id);
                        }
                    }
                }
            }
        }

        // Sessions that finished their queues cleanly are complete.
        if let (Some(agg), Some(agg_id)) = (&self.aggregator, agg_id) {
            if let Ok(aggregation) = agg.get(agg_id) {
                for session_id in aggregation.sessions.keys() {
                    if !failed_rows.contains(session_id) {
                        let _ = agg.update(
                            agg_id,
                            session_id,
                            ProgressUpdate::status(ProgressStatus::Completed),
                        );
                    }
                }
            }
        }
    }

    fn finalize(&self, task_id: &str, agg_id: Option<&str>) -> Result<DistributedTask> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::TaskNotFound(task_id.to_string()))?;

        // A concurrent cancel wins over the natural completion status, but
        // subtask outcomes recorded above are kept (last-write-wins).
        if task.status != DistributedTaskStatus::Cancelled {
            task.status = if task.all_completed() {
                DistributedTaskStatus::Completed
            } else {
                DistributedTaskStatus::Failed
            };
            task.completed_at = Some(Utc::now());
        }

        if let (Some(agg), Some(agg_id)) = (&self.aggregator, agg_id) {
            let _ = agg.set_summary(
                agg_id,
                format!("task {} finished with status {}", task.id, task.status),
            );
        }

        info!(task_id = %task.id, status = %task.status, "task finished");
        Ok(task.clone())
    }

    fn mark_running(&self, task_id: &str, subtask_id: &str) {
        let mut tasks = self.tasks.write();
        if let Some(subtask) = tasks
            .get_mut(task_id)
            .and_then(|t| t.subtask_mut(subtask_id))
        {
            subtask.status = SubtaskStatus::Running;
            subtask.started_at = Some(Utc::now());
        }
    }

    fn record_success(
        &self,
        task_id: &str,
        subtask_id: &str,
        session_id: &str,
        output: &str,
        agg_id: Option<&str>,
    ) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.get_mut(task_id) {
            task.results.insert(subtask_id.to_string(), output.to_string());
            if let Some(subtask) = task.subtask_mut(subtask_id) {
                subtask.complete(output);
            }
        }
        drop(tasks);

        if let (Some(agg), Some(agg_id)) = (&self.aggregator, agg_id) {
            for line in output.lines() {
                let _ = agg.add_output(agg_id, session_id, line);
            }
        }
    }

    fn record_failure(
        &self,
        task_id: &str,
        subtask_id: &str,
        session_id: &str,
        error: &str,
        agg_id: Option<&str>,
    ) {
        debug!(task_id, subtask_id, session_id, error, "subtask failed");
        let mut tasks = self.tasks.write();
        if let Some(subtask) = tasks
            .get_mut(task_id)
            .and_then(|t| t.subtask_mut(subtask_id))
        {
            subtask.fail(error);
        }
        drop(tasks);

        if let (Some(agg), Some(agg_id)) = (&self.aggregator, agg_id) {
            let _ = agg.update(agg_id, session_id, ProgressUpdate::failed(error));
        }
    }

    /// Cooperative cancellation: marks state but cannot interrupt an
    /// in-flight backend call; a running subtask may still report its
    /// outcome afterwards.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let mut released: Vec<String> = Vec::new();
        {
            let mut tasks = self.tasks.write();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::TaskNotFound(task_id.to_string()))?;

            for subtask in &mut task.subtasks {
                if !subtask.status.is_terminal() {
                    subtask.fail("cancelled");
                    if let Some(session_id) = &subtask.assigned_session {
                        released.push(session_id.clone());
                    }
                }
            }
            task.status = DistributedTaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
        }

        for session_id in released {
            // Already-idle sessions make this a no-op rejection.
            let _ = self
                .registry
                .request_transition(&session_id, SessionState::Ready, "task cancelled");
        }

        info!(task_id, "task cancelled");
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<DistributedTask> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::TaskNotFound(task_id.to_string()))
    }

    pub fn tasks(&self) -> Vec<DistributedTask> {
        self.tasks.read().values().cloned().collect()
    }

    /// Aggregation id mirroring a task's progress, when an aggregator is
    /// wired.
    pub fn aggregation_for(&self, task_id: &str) -> Option<String> {
        self.aggregations.read().get(task_id).cloned()
    }

    /// Drops finished tasks created before the cutoff.
    pub fn cleanup(&self, older_than: chrono::Duration) {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.write();
        let removed: Vec<String> = tasks
            .iter()
            .filter(|(_, t)| {
                t.created_at < cutoff && t.status != DistributedTaskStatus::InProgress
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            tasks.remove(id);
        }
        drop(tasks);
        self.aggregations.write().retain(|id, _| !removed.contains(id));
    }
}

/// Executes one session's subtask queue sequentially. A failure aborts the
/// rest of this queue; other sessions are unaffected.
async fn run_session_queue(
    registry: Arc<SessionRegistry>,
    safety: Arc<SafetyEngine>,
    recovery: Arc<RecoveryEngine>,
    session_id: String,
    queue: Vec<(String, String)>,
) -> (String, Vec<(String, std::result::Result<String, String>)>) {
    let mut outcomes = Vec::with_capacity(queue.len());
    let mut aborted = false;

    for (subtask_id, prompt) in queue {
        if aborted {
            outcomes.push((
                subtask_id,
                Err("aborted: earlier subtask in this session's queue failed".to_string()),
            ));
            continue;
        }

        // Policy verdicts are deterministic; resolve them before spending
        // the retry budget.
        let check = safety.check_command(&session_id, &prompt);
        if !check.safe {
            aborted = true;
            outcomes.push((
                subtask_id,
                Err(format!(
                    "denied by policy: {}",
                    check.message.unwrap_or_default()
                )),
            ));
            continue;
        }
        if check.requires_approval {
            aborted = true;
            let approval_id = safety.request_approval(&session_id, &prompt);
            outcomes.push((
                subtask_id,
                Err(format!("requires approval: {}", approval_id)),
            ));
            continue;
        }

        if let Err(e) =
            registry.request_transition(&session_id, SessionState::Busy, "subtask start")
        {
            aborted = true;
            outcomes.push((subtask_id, Err(e.to_string())));
            continue;
        }

        let op_safety = Arc::clone(&safety);
        let op_session = session_id.clone();
        let op_prompt = prompt.clone();
        let result = recovery
            .execute_with_retry(
                &session_id,
                move || {
                    let safety = Arc::clone(&op_safety);
                    let session_id = op_session.clone();
                    let prompt = op_prompt.clone();
                    async move {
                        let outcome = safety.execute_with_safety(&session_id, &prompt, None).await?;
                        if outcome.success {
                            Ok(outcome.output.unwrap_or_default())
                        } else {
                            Err(FleetError::Unrecoverable(
                                outcome.error.unwrap_or_else(|| "command failed".to_string()),
                            ))
                        }
                    }
                },
                ErrorKind::CommandFailed,
            )
            .await;

        let reason = if result.is_ok() {
            "subtask complete"
        } else {
            "subtask failed"
        };
        if let Err(e) = registry.request_transition(&session_id, SessionState::Ready, reason) {
            // Recovery may have forced the session into error; leave it.
            debug!(session_id = %session_id, error = %e, "could not release session");
        }

        match result {
            Ok(output) => outcomes.push((subtask_id, Ok(output))),
            Err(e) => {
                aborted = true;
                outcomes.push((subtask_id, Err(e.to_string())));
            }
        }
    }

    (session_id, outcomes)
}

/// Layers subtasks into dependency waves (Kahn's algorithm level by
/// level). Returns wave lists of spec indices in submission order.
fn topological_waves(specs: &[SubtaskSpec]) -> Result<Vec<Vec<usize>>> {
    let n = specs.len();
    for (idx, spec) in specs.iter().enumerate() {
        for &dep in &spec.depends_on {
            if dep >= n {
                return Err(FleetError::Config(format!(
                    "subtask {} depends on unknown subtask index {}",
                    idx, dep
                )));
            }
            if dep == idx {
                return Err(FleetError::DependencyCycle(format!("subtask {}", idx)));
            }
        }
    }

    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (idx, spec) in specs.iter().enumerate() {
        indegree[idx] = spec.depends_on.len();
        for &dep in &spec.depends_on {
            dependents[dep].push(idx);
        }
    }

    let mut waves = Vec::new();
    let mut current: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut processed = 0usize;

    while !current.is_empty() {
        processed += current.len();
        let mut next = Vec::new();
        for &idx in &current {
            for &dependent in &dependents[idx] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_unstable();
        waves.push(std::mem::replace(&mut current, next));
    }

    if processed < n {
        let stuck: Vec<String> = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| i.to_string())
            .collect();
        return Err(FleetError::DependencyCycle(stuck.join(", ")));
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(prompt: &str, deps: &[usize]) -> SubtaskSpec {
        SubtaskSpec::new(prompt).with_depends_on(deps.to_vec())
    }

    #[test]
    fn test_waves_without_dependencies() {
        let specs = vec![spec("a", &[]), spec("b", &[]), spec("c", &[])];
        let waves = topological_waves(&specs).unwrap();
        assert_eq!(waves, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_waves_layer_dependencies() {
        let specs = vec![spec("a", &[]), spec("b", &[0]), spec("c", &[0]), spec("d", &[1, 2])];
        let waves = topological_waves(&specs).unwrap();
        assert_eq!(waves, vec![vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_cycle_detected() {
        let specs = vec![spec("a", &[1]), spec("b", &[0])];
        assert!(matches!(
            topological_waves(&specs),
            Err(FleetError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let specs = vec![spec("a", &[0])];
        assert!(matches!(
            topological_waves(&specs),
            Err(FleetError::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let specs = vec![spec("a", &[5])];
        assert!(matches!(
            topological_waves(&specs),
            Err(FleetError::Config(_))
        ));
    }
}
