use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use termfleet::config::{RecoveryConfig, SessionConfig};
use termfleet::session::SessionState;
use termfleet::{
    ErrorContext, ErrorKind, FleetError, MockBackend, RecoveryEngine, SessionRegistry,
    TerminalBackend,
};

fn fast_recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        backoff_multiplier: 1.0,
        operation_timeout_secs: 30,
        ..Default::default()
    }
}

async fn setup(config: RecoveryConfig) -> (Arc<MockBackend>, Arc<SessionRegistry>, RecoveryEngine) {
    let mock = Arc::new(MockBackend::new());
    let backend: Arc<dyn TerminalBackend> = mock.clone();
    let registry = Arc::new(SessionRegistry::new(backend, SessionConfig::default()));
    let engine = RecoveryEngine::new(Arc::clone(&registry), config);
    (mock, registry, engine)
}

#[tokio::test]
async fn test_unrecoverable_error_aborts_after_first_attempt() {
    let (_mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let op = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(FleetError::Unrecoverable("session gone".to_string()))
            }
        }
    };

    let err = engine
        .execute_with_retry(&session.id, op, ErrorKind::SessionLost)
        .await
        .unwrap_err();

    // No retries for an unrecoverable kind, and the original error comes back.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, FleetError::Unrecoverable(_)));
    assert!(err.to_string().contains("session gone"));
    assert!(!engine.session_health(&session.id).unwrap().healthy);
}

#[tokio::test]
async fn test_transient_failure_retries_to_success() {
    let (_mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let op = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FleetError::Collaborator("connection reset".to_string()))
                } else {
                    Ok("done".to_string())
                }
            }
        }
    };

    let value = engine
        .execute_with_retry(&session.id, op, ErrorKind::Network)
        .await
        .unwrap();
    assert_eq!(value, "done");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_budget_returns_last_error() {
    let (_mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let op = {
        let calls = Arc::clone(&calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FleetError::Collaborator("still broken".to_string()))
            }
        }
    };

    let err = engine
        .execute_with_retry(&session.id, op, ErrorKind::Network)
        .await
        .unwrap_err();

    // max_retries = 2 means one initial attempt plus two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(err.to_string().contains("still broken"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_operation_is_classified_as_timeout() {
    let config = RecoveryConfig {
        max_retries: 0,
        base_delay_ms: 1,
        operation_timeout_secs: 1,
        ..Default::default()
    };
    let (_mock, registry, engine) = setup(config).await;
    let session = registry.create(None, None).await.unwrap();

    let op = || async {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        Ok::<(), FleetError>(())
    };

    let err = engine
        .execute_with_retry(&session.id, op, ErrorKind::CommandFailed)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Timeout { secs: 1, .. }));

    let health = engine.session_health(&session.id).unwrap();
    assert_eq!(health.recent_errors.last().unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_command_failure_recovery_interrupts_and_clears() {
    let (mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();

    let ctx = ErrorContext::new(&session.id, ErrorKind::CommandFailed, "exit status 1");
    let recovered = engine.handle_error(&ctx).await;

    assert!(recovered);
    assert_eq!(mock.controls(&session.id), vec!['c']);
    assert_eq!(mock.writes(&session.id), vec!["clear\n".to_string()]);
    assert!(engine.session_health(&session.id).unwrap().healthy);
}

#[tokio::test]
async fn test_crash_of_vanished_session_is_not_recovered() {
    let (mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();
    mock.drop_session(&session.id);

    let ctx = ErrorContext::new(&session.id, ErrorKind::Crash, "shell exited");
    let recovered = engine.handle_error(&ctx).await;

    assert!(!recovered);
    let health = engine.session_health(&session.id).unwrap();
    assert!(!health.healthy);
    assert_eq!(health.recent_errors.len(), 1);
}

#[tokio::test]
async fn test_spent_retry_budget_skips_recovery_actions() {
    let (mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();

    let ctx = ErrorContext::new(&session.id, ErrorKind::CommandFailed, "exit status 1")
        .with_retry_count(2);
    let recovered = engine.handle_error(&ctx).await;

    assert!(!recovered);
    // No interrupt or clear once the budget is spent.
    assert!(mock.controls(&session.id).is_empty());
    assert!(mock.writes(&session.id).is_empty());
}

#[tokio::test]
async fn test_health_sweep_tracks_probe_failures() {
    let (mock, registry, engine) = setup(fast_recovery_config()).await;
    let good = registry.create(Some("good"), None).await.unwrap();
    let bad = registry.create(Some("bad"), None).await.unwrap();
    mock.fail_reads(&bad.id, true);

    let report = engine.check_all().await;
    assert_eq!(report.len(), 2);

    let good_health = engine.session_health(&good.id).unwrap();
    assert!(good_health.healthy);
    assert_eq!(good_health.consecutive_failures, 0);

    let bad_health = engine.session_health(&bad.id).unwrap();
    assert!(!bad_health.healthy);
    assert_eq!(bad_health.consecutive_failures, 1);

    // A passing probe resets the failure streak.
    mock.fail_reads(&bad.id, false);
    engine.check_all().await;
    assert!(engine.session_health(&bad.id).unwrap().healthy);
    assert_eq!(engine.session_health(&bad.id).unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn test_persistent_probe_failures_force_error_state() {
    let (mock, registry, engine) = setup(fast_recovery_config()).await;
    let session = registry.create(None, None).await.unwrap();
    mock.fail_reads(&session.id, true);

    for _ in 0..3 {
        engine.check_all().await;
    }

    assert_eq!(registry.get(&session.id).unwrap().state, SessionState::Error);
}
