use std::sync::Arc;

use termfleet::config::{RecoveryConfig, SafetyConfig, SessionConfig};
use termfleet::distribution::{DistributedTaskStatus, SubtaskStatus};
use termfleet::progress::{OverallStatus, ProgressStatus};
use termfleet::{
    DistributionEngine, FleetError, MockBackend, ProgressAggregator, RecoveryEngine, SafetyEngine,
    SafetyTier, SessionRegistry, SubtaskSpec, TerminalBackend,
};

struct Fixture {
    mock: Arc<MockBackend>,
    registry: Arc<SessionRegistry>,
    aggregator: Arc<ProgressAggregator>,
    engine: DistributionEngine,
}

fn fixture() -> Fixture {
    let mock = Arc::new(MockBackend::new());
    let backend: Arc<dyn TerminalBackend> = mock.clone();
    let registry = Arc::new(SessionRegistry::new(backend, SessionConfig::default()));
    let safety_config = SafetyConfig {
        settle_delay_ms: 0,
        ..Default::default()
    };
    let safety = Arc::new(SafetyEngine::new(Arc::clone(&registry), safety_config));
    let recovery_config = RecoveryConfig {
        max_retries: 0,
        base_delay_ms: 1,
        ..Default::default()
    };
    let recovery = Arc::new(RecoveryEngine::new(Arc::clone(&registry), recovery_config));
    let aggregator = Arc::new(ProgressAggregator::new());
    let engine = DistributionEngine::new(Arc::clone(&registry), safety, recovery)
        .with_aggregator(Arc::clone(&aggregator));
    Fixture {
        mock,
        registry,
        aggregator,
        engine,
    }
}

async fn trusted_sessions(fx: &Fixture, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let session = fx
            .registry
            .create(Some(&format!("worker-{}", i)), None)
            .await
            .unwrap();
        fx.registry.set_tier(&session.id, SafetyTier::Trusted).unwrap();
        ids.push(session.id);
    }
    ids
}

#[tokio::test]
async fn test_round_robin_over_two_sessions() {
    let fx = fixture();
    trusted_sessions(&fx, 2).await;

    let task = fx
        .engine
        .distribute(
            "run the echoes",
            vec![
                "echo a".to_string(),
                "echo b".to_string(),
                "echo c".to_string(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Completed);
    assert_eq!(task.subtasks.len(), 3);
    assert_eq!(task.results.len(), 3);

    // Third subtask wraps around to the first session.
    let first = task.subtasks[0].assigned_session.as_ref().unwrap();
    let second = task.subtasks[1].assigned_session.as_ref().unwrap();
    let third = task.subtasks[2].assigned_session.as_ref().unwrap();
    assert_eq!(first, third);
    assert_ne!(first, second);

    for subtask in &task.subtasks {
        assert_eq!(subtask.status, SubtaskStatus::Completed);
        assert!(subtask.started_at.is_some());
        assert!(subtask.completed_at.is_some());
    }
}

#[tokio::test]
async fn test_distribution_writes_commands_to_sessions() {
    let fx = fixture();
    let ids = trusted_sessions(&fx, 1).await;

    fx.engine
        .distribute("one job", vec!["echo hello".to_string()])
        .await
        .unwrap();

    assert_eq!(fx.mock.writes(&ids[0]), vec!["echo hello\n".to_string()]);
}

#[tokio::test]
async fn test_no_idle_sessions_is_rejected() {
    let fx = fixture();

    let err = fx
        .engine
        .distribute("work", vec!["echo hi".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::NoIdleSessions));
}

#[tokio::test]
async fn test_empty_task_is_rejected() {
    let fx = fixture();
    trusted_sessions(&fx, 1).await;

    let err = fx.engine.distribute("nothing", vec![]).await.unwrap_err();
    assert!(matches!(err, FleetError::Config(_)));
}

#[tokio::test]
async fn test_session_failure_does_not_poison_siblings() {
    let fx = fixture();
    let ids = trusted_sessions(&fx, 2).await;
    // The backend loses one session before work starts.
    fx.mock.drop_session(&ids[0]);

    let task = fx
        .engine
        .distribute(
            "mixed outcome",
            vec!["echo one".to_string(), "echo two".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Failed);
    let on_dead: Vec<_> = task
        .subtasks
        .iter()
        .filter(|s| s.assigned_session.as_deref() == Some(ids[0].as_str()))
        .collect();
    let on_live: Vec<_> = task
        .subtasks
        .iter()
        .filter(|s| s.assigned_session.as_deref() == Some(ids[1].as_str()))
        .collect();
    assert!(!on_dead.is_empty());
    assert!(!on_live.is_empty());
    assert!(on_dead.iter().all(|s| s.status == SubtaskStatus::Failed));
    assert!(on_live.iter().all(|s| s.status == SubtaskStatus::Completed));
}

#[tokio::test]
async fn test_dependencies_run_in_wave_order() {
    let fx = fixture();
    let ids = trusted_sessions(&fx, 1).await;

    let specs = vec![
        SubtaskSpec::new("echo a"),
        SubtaskSpec::new("echo b"),
        SubtaskSpec::new("echo c").with_depends_on(vec![0, 1]),
    ];
    let task = fx
        .engine
        .distribute_with_dependencies("ordered", specs)
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Completed);
    assert_eq!(
        fx.mock.writes(&ids[0]),
        vec![
            "echo a\n".to_string(),
            "echo b\n".to_string(),
            "echo c\n".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_dependent_subtask_aborts_when_dependency_fails() {
    let fx = fixture();
    let ids = trusted_sessions(&fx, 1).await;
    fx.mock.drop_session(&ids[0]);

    let specs = vec![
        SubtaskSpec::new("echo a"),
        SubtaskSpec::new("echo b").with_depends_on(vec![0]),
    ];
    let task = fx
        .engine
        .distribute_with_dependencies("doomed chain", specs)
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Failed);
    assert_eq!(task.subtasks[1].status, SubtaskStatus::Failed);
    assert!(task.subtasks[1]
        .error
        .as_deref()
        .unwrap_or("")
        .starts_with("aborted"));
}

#[tokio::test]
async fn test_dependency_abort_fails_the_owning_sessions_row() {
    let fx = fixture();
    trusted_sessions(&fx, 2).await;
    // Subtask 0 lands on the first idle session (sorted by id); losing that
    // session forces subtask 1, on the healthy sibling, to abort.
    let doomed = fx.registry.idle_sessions()[0].id.clone();
    fx.mock.drop_session(&doomed);

    let specs = vec![
        SubtaskSpec::new("echo a"),
        SubtaskSpec::new("echo b").with_depends_on(vec![0]),
    ];
    let task = fx
        .engine
        .distribute_with_dependencies("chained", specs)
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Failed);
    let sibling = task.subtasks[1].assigned_session.clone().unwrap();
    assert_ne!(sibling, doomed);
    assert!(task.subtasks[1]
        .error
        .as_deref()
        .unwrap()
        .starts_with("aborted"));

    // The sibling never completed anything; its aggregation row must not
    // be swept to completed.
    let agg_id = fx.engine.aggregation_for(&task.id).unwrap();
    let aggregation = fx.aggregator.get(&agg_id).unwrap();
    assert_eq!(aggregation.sessions[&sibling].status, ProgressStatus::Failed);
    assert_eq!(aggregation.overall, OverallStatus::Failed);
}

#[tokio::test]
async fn test_dependency_cycle_is_rejected() {
    let fx = fixture();
    trusted_sessions(&fx, 1).await;

    let specs = vec![
        SubtaskSpec::new("echo a").with_depends_on(vec![1]),
        SubtaskSpec::new("echo b").with_depends_on(vec![0]),
    ];
    let err = fx
        .engine
        .distribute_with_dependencies("cyclic", specs)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::DependencyCycle(_)));
}

#[tokio::test]
async fn test_unapproved_command_fails_subtask_and_parks_approval() {
    let fx = fixture();
    // Standard tier: anything off the allow-list needs approval.
    fx.registry.create(Some("careful"), None).await.unwrap();

    let task = fx
        .engine
        .distribute("risky", vec!["vim notes.txt".to_string()])
        .await
        .unwrap();

    assert_eq!(task.status, DistributedTaskStatus::Failed);
    let error = task.subtasks[0].error.as_deref().unwrap();
    assert!(error.contains("requires approval: appr-"));
}

#[tokio::test]
async fn test_cancel_after_completion_keeps_subtask_outcomes() {
    let fx = fixture();
    trusted_sessions(&fx, 1).await;

    let task = fx
        .engine
        .distribute("quick", vec!["echo done".to_string()])
        .await
        .unwrap();
    assert_eq!(task.status, DistributedTaskStatus::Completed);

    fx.engine.cancel(&task.id).unwrap();
    let cancelled = fx.engine.get_task(&task.id).unwrap();
    assert_eq!(cancelled.status, DistributedTaskStatus::Cancelled);
    // Terminal subtasks are not rewritten by a late cancel.
    assert_eq!(cancelled.subtasks[0].status, SubtaskStatus::Completed);
}

#[tokio::test]
async fn test_cancel_unknown_task() {
    let fx = fixture();
    let err = fx.engine.cancel("task-nope").unwrap_err();
    assert!(matches!(err, FleetError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_progress_is_mirrored_into_aggregation() {
    let fx = fixture();
    trusted_sessions(&fx, 2).await;

    let task = fx
        .engine
        .distribute(
            "mirrored",
            vec!["echo left".to_string(), "echo right".to_string()],
        )
        .await
        .unwrap();

    let agg_id = fx.engine.aggregation_for(&task.id).unwrap();
    let aggregation = fx.aggregator.get(&agg_id).unwrap();
    assert_eq!(aggregation.main_task_id, task.id);
    assert_eq!(aggregation.overall, OverallStatus::Completed);

    let report = fx.aggregator.synthesize(&agg_id).unwrap();
    assert!(report.contains("Overall status: completed"));
    assert!(report.contains(&format!("Summary: task {} finished with status completed", task.id)));
}

#[tokio::test]
async fn test_cleanup_drops_finished_tasks() {
    let fx = fixture();
    trusted_sessions(&fx, 1).await;

    let task = fx
        .engine
        .distribute("short lived", vec!["echo bye".to_string()])
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    fx.engine.cleanup(chrono::Duration::zero());
    assert!(matches!(
        fx.engine.get_task(&task.id),
        Err(FleetError::TaskNotFound(_))
    ));
    assert!(fx.engine.aggregation_for(&task.id).is_none());
}
