use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::state::{SessionState, StateTransition};
use super::types::Session;
use crate::config::SessionConfig;
use crate::error::{FleetError, Result};
use crate::safety::SafetyTier;
use crate::terminal::TerminalBackend;
use crate::utils::short_id;

/// Owns the set of known sessions and is the sole writer of their lifecycle
/// state. Every other component requests transitions through
/// [`SessionRegistry::request_transition`]; illegal moves are rejected
/// against the [`SessionState::allowed_transitions`] table.
pub struct SessionRegistry {
    backend: Arc<dyn TerminalBackend>,
    sessions: RwLock<HashMap<String, Session>>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn TerminalBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn backend(&self) -> Arc<dyn TerminalBackend> {
        Arc::clone(&self.backend)
    }

    /// Creates a session via the backend and registers it as `Ready`.
    pub async fn create(&self, name: Option<&str>, profile: Option<&str>) -> Result<Session> {
        let handle = self
            .backend
            .create_session(name, profile)
            .await
            .map_err(|e| FleetError::Collaborator(format!("session creation failed: {}", e)))?;

        let display = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("session-{}", short_id()));

        let mut session =
            Session::new(handle.id.as_str(), display).with_refs(handle.window_ref, handle.tab_ref);
        session.state_history.push(StateTransition::new(
            SessionState::Initializing,
            SessionState::Ready,
            "created",
        ));
        session.state = SessionState::Ready;

        info!(session_id = %session.id, name = %session.name, "session created");

        self.sessions.write().insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Snapshot of all known sessions, refreshed against the live backend
    /// listing. Malformed listing rows (empty id) are skipped, and a failed
    /// listing degrades to the registry's own records; enumeration never
    /// fails on partial data.
    pub async fn enumerate(&self) -> Vec<Session> {
        match self.backend.list_sessions().await {
            Ok(listings) => {
                let mut sessions = self.sessions.write();
                for listing in listings {
                    if listing.id.is_empty() {
                        debug!("skipping malformed session listing");
                        continue;
                    }
                    if let Some(session) = sessions.get_mut(&listing.id) {
                        session.tty = listing.tty.clone();
                        if !listing.name.is_empty() {
                            session.name = listing.name.clone();
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "session listing failed, returning registry snapshot");
            }
        }

        self.sessions.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FleetError::SessionNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Applies a state transition, rejecting moves the transition table
    /// does not allow.
    pub fn request_transition(
        &self,
        id: &str,
        to: SessionState,
        reason: impl Into<String>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| FleetError::SessionNotFound(id.to_string()))?;

        if !session.state.can_transition_to(to) {
            return Err(FleetError::InvalidTransition {
                from: session.state.to_string(),
                to: to.to_string(),
                allowed: session
                    .state
                    .allowed_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let reason = reason.into();
        debug!(session_id = id, from = %session.state, to = %to, %reason, "session transition");

        Self::record_transition(session, to, reason, self.config.state_history_cap);
        Ok(())
    }

    /// Forces a session into `Error` from any non-terminal state. Reserved
    /// for the recovery engine; bypasses the transition table by design.
    pub fn force_error(&self, id: &str, reason: impl Into<String>) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| FleetError::SessionNotFound(id.to_string()))?;

        if session.state.is_terminal() {
            return Ok(());
        }

        let reason = reason.into();
        warn!(session_id = id, from = %session.state, %reason, "session forced to error");
        Self::record_transition(session, SessionState::Error, reason, self.config.state_history_cap);
        Ok(())
    }

    fn record_transition(session: &mut Session, to: SessionState, reason: String, cap: usize) {
        session
            .state_history
            .push(StateTransition::new(session.state, to, reason));
        if session.state_history.len() > cap {
            let excess = session.state_history.len() - cap;
            session.state_history.drain(..excess);
        }
        session.state = to;
        session.last_active = chrono::Utc::now();
    }

    pub fn sessions_in_state(&self, state: SessionState) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect()
    }

    /// Sessions ready to accept work, ordered by id for deterministic
    /// assignment.
    pub fn idle_sessions(&self) -> Vec<Session> {
        let mut idle: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_idle())
            .cloned()
            .collect();
        idle.sort_by(|a, b| a.id.cmp(&b.id));
        idle
    }

    pub fn touch(&self, id: &str) {
        if let Some(session) = self.sessions.write().get_mut(id) {
            session.last_active = chrono::Utc::now();
        }
    }

    pub fn set_tier(&self, id: &str, tier: SafetyTier) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| FleetError::SessionNotFound(id.to_string()))?;
        session.tier = tier;
        Ok(())
    }

    pub fn tier_of(&self, id: &str) -> Result<SafetyTier> {
        self.get(id).map(|s| s.tier)
    }

    /// Requests an external close and removes the session regardless of the
    /// backend outcome (best-effort).
    pub async fn close(&self, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(FleetError::SessionNotFound(id.to_string()));
        }

        if let Err(e) = self.backend.close_session(id).await {
            warn!(session_id = id, error = %e, "backend close failed, removing anyway");
        }

        self.sessions.write().remove(id);
        info!(session_id = id, "session closed");
        Ok(())
    }
}
