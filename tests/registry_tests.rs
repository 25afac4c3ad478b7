use std::sync::Arc;

use termfleet::config::SessionConfig;
use termfleet::session::SessionState;
use termfleet::{FleetError, MockBackend, SessionRegistry, TerminalBackend};

fn setup() -> (Arc<MockBackend>, SessionRegistry) {
    let mock = Arc::new(MockBackend::new());
    let backend: Arc<dyn TerminalBackend> = mock.clone();
    let registry = SessionRegistry::new(backend, SessionConfig::default());
    (mock, registry)
}

#[tokio::test]
async fn test_created_session_is_ready() {
    let (_mock, registry) = setup();

    let session = registry.create(Some("worker-1"), None).await.unwrap();
    assert_eq!(session.state, SessionState::Ready);
    assert_eq!(session.name, "worker-1");
    assert!(session.id.starts_with("mock-"));

    // Creation is recorded as the initializing -> ready transition.
    let recorded = registry.get(&session.id).unwrap();
    assert_eq!(recorded.state_history.len(), 1);
    assert_eq!(recorded.state_history[0].from, SessionState::Initializing);
    assert_eq!(recorded.state_history[0].to, SessionState::Ready);
}

#[tokio::test]
async fn test_create_surfaces_backend_failure() {
    let (mock, registry) = setup();
    mock.fail_next_create();

    let result = registry.create(None, None).await;
    assert!(matches!(result, Err(FleetError::Collaborator(_))));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_busy_round_trip() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();

    registry
        .request_transition(&session.id, SessionState::Busy, "task assigned")
        .unwrap();
    assert_eq!(registry.get(&session.id).unwrap().state, SessionState::Busy);

    registry
        .request_transition(&session.id, SessionState::Ready, "task finished")
        .unwrap();
    assert_eq!(registry.get(&session.id).unwrap().state, SessionState::Ready);
}

#[tokio::test]
async fn test_self_transition_is_rejected() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();

    let err = registry
        .request_transition(&session.id, SessionState::Ready, "noop")
        .unwrap_err();
    match err {
        FleetError::InvalidTransition { from, to, allowed } => {
            assert_eq!(from, "ready");
            assert_eq!(to, "ready");
            assert!(allowed.contains("busy"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_closing_is_terminal() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();

    registry
        .request_transition(&session.id, SessionState::Closing, "shutdown")
        .unwrap();
    let err = registry
        .request_transition(&session.id, SessionState::Ready, "revive")
        .unwrap_err();
    assert!(matches!(err, FleetError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_forced_error_can_return_to_ready() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();
    registry
        .request_transition(&session.id, SessionState::Busy, "working")
        .unwrap();

    registry.force_error(&session.id, "probe failures").unwrap();
    assert_eq!(registry.get(&session.id).unwrap().state, SessionState::Error);

    registry
        .request_transition(&session.id, SessionState::Ready, "recovered")
        .unwrap();
    assert_eq!(registry.get(&session.id).unwrap().state, SessionState::Ready);
}

#[tokio::test]
async fn test_error_cannot_go_busy_directly() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();
    registry.force_error(&session.id, "boom").unwrap();

    let err = registry
        .request_transition(&session.id, SessionState::Busy, "assign")
        .unwrap_err();
    assert!(matches!(err, FleetError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_state_history_is_bounded() {
    let mock = Arc::new(MockBackend::new());
    let backend: Arc<dyn TerminalBackend> = mock.clone();
    let config = SessionConfig {
        state_history_cap: 4,
    };
    let registry = SessionRegistry::new(backend, config);
    let session = registry.create(None, None).await.unwrap();

    for _ in 0..5 {
        registry
            .request_transition(&session.id, SessionState::Busy, "assign")
            .unwrap();
        registry
            .request_transition(&session.id, SessionState::Ready, "done")
            .unwrap();
    }

    let recorded = registry.get(&session.id).unwrap();
    assert_eq!(recorded.state_history.len(), 4);
    // Oldest entries dropped; the tail still ends at the current state.
    assert_eq!(recorded.state_history.last().unwrap().to, SessionState::Ready);
}

#[tokio::test]
async fn test_sessions_in_state_filters() {
    let (_mock, registry) = setup();
    let a = registry.create(Some("a"), None).await.unwrap();
    let b = registry.create(Some("b"), None).await.unwrap();
    registry
        .request_transition(&a.id, SessionState::Busy, "assign")
        .unwrap();

    let busy = registry.sessions_in_state(SessionState::Busy);
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].id, a.id);

    let ready = registry.sessions_in_state(SessionState::Ready);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, b.id);

    assert!(registry.sessions_in_state(SessionState::Error).is_empty());
}

#[tokio::test]
async fn test_idle_sessions_sorted_and_filtered() {
    let (_mock, registry) = setup();
    let a = registry.create(Some("a"), None).await.unwrap();
    let b = registry.create(Some("b"), None).await.unwrap();
    let c = registry.create(Some("c"), None).await.unwrap();

    registry
        .request_transition(&b.id, SessionState::Busy, "working")
        .unwrap();

    let idle = registry.idle_sessions();
    assert_eq!(idle.len(), 2);
    let mut expected = vec![a.id.clone(), c.id.clone()];
    expected.sort();
    let got: Vec<String> = idle.iter().map(|s| s.id.clone()).collect();
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_enumerate_skips_malformed_listing() {
    let (mock, registry) = setup();
    registry.create(Some("real"), None).await.unwrap();
    mock.add_session("", "ghost");

    let sessions = registry.enumerate().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "real");
}

#[tokio::test]
async fn test_enumerate_refreshes_tty_from_backend() {
    let (_mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();

    let sessions = registry.enumerate().await;
    let refreshed = sessions.iter().find(|s| s.id == session.id).unwrap();
    assert!(refreshed.tty.as_deref().unwrap_or("").starts_with("/dev/ttys"));
}

#[tokio::test]
async fn test_close_removes_even_when_backend_fails() {
    let (mock, registry) = setup();
    let session = registry.create(None, None).await.unwrap();

    // Backend no longer knows the session, close still succeeds locally.
    mock.drop_session(&session.id);
    registry.close(&session.id).await.unwrap();
    assert!(!registry.contains(&session.id));

    let err = registry.close(&session.id).await.unwrap_err();
    assert!(matches!(err, FleetError::SessionNotFound(_)));
}
