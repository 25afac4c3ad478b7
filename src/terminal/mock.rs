//! In-memory backend used by the test suites.

use std::collections::HashMap;

use parking_lot::Mutex;

use async_trait::async_trait;

use super::backend::{ProcessSample, SessionHandle, SessionListing, TerminalBackend};
use crate::error::{FleetError, Result};
use crate::utils::short_id;

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, MockSession>,
    fail_next_create: bool,
    created: u32,
}

struct MockSession {
    name: String,
    tty: Option<String>,
    /// Lines returned by `read`, newest last. Drained front-first when
    /// scripted as a queue; the last entry is sticky.
    reads: Vec<String>,
    writes: Vec<String>,
    controls: Vec<char>,
    fail_reads: bool,
    samples: Vec<ProcessSample>,
}

impl MockSession {
    fn new(name: String, tty_index: u32) -> Self {
        Self {
            name,
            tty: Some(format!("/dev/ttys{:03}", tty_index)),
            reads: vec!["$".to_string()],
            writes: Vec::new(),
            controls: Vec::new(),
            fail_reads: false,
            samples: Vec::new(),
        }
    }
}

/// Scripted in-memory stand-in for the terminal-automation layer.
///
/// Tests preload read outputs and failure injections, run the engines
/// against it, then assert on the recorded writes and control characters.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a session without going through `create_session`.
    pub fn add_session(&self, id: &str, name: &str) {
        let mut state = self.state.lock();
        state.created += 1;
        let session = MockSession::new(name.to_string(), state.created);
        state.sessions.insert(id.to_string(), session);
    }

    /// Make the next `create_session` call fail.
    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    /// Make every `read` for `id` fail until cleared.
    pub fn fail_reads(&self, id: &str, fail: bool) {
        if let Some(s) = self.state.lock().sessions.get_mut(id) {
            s.fail_reads = fail;
        }
    }

    /// Queue the outputs `read` will return for `id`; the last one is sticky.
    pub fn script_reads(&self, id: &str, outputs: &[&str]) {
        if let Some(s) = self.state.lock().sessions.get_mut(id) {
            s.reads = outputs.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn set_samples(&self, id: &str, samples: Vec<ProcessSample>) {
        if let Some(s) = self.state.lock().sessions.get_mut(id) {
            s.samples = samples;
        }
    }

    /// Drop a session from the listing without a close call, simulating a
    /// session lost out from under the core.
    pub fn drop_session(&self, id: &str) {
        self.state.lock().sessions.remove(id);
    }

    pub fn writes(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .get(id)
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }

    pub fn controls(&self, id: &str) -> Vec<char> {
        self.state
            .lock()
            .sessions
            .get(id)
            .map(|s| s.controls.clone())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

#[async_trait]
impl TerminalBackend for MockBackend {
    async fn create_session(
        &self,
        name: Option<&str>,
        _profile: Option<&str>,
    ) -> Result<SessionHandle> {
        let mut state = self.state.lock();
        if state.fail_next_create {
            state.fail_next_create = false;
            return Err(FleetError::Collaborator(
                "terminal application unreachable".to_string(),
            ));
        }
        state.created += 1;
        let id = format!("mock-{}", short_id());
        let display = name
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("session-{}", state.created));
        let session = MockSession::new(display, state.created);
        state.sessions.insert(id.clone(), session);
        Ok(SessionHandle {
            id,
            window_ref: "w0".to_string(),
            tab_ref: "t0".to_string(),
        })
    }

    async fn list_sessions(&self) -> Result<Vec<SessionListing>> {
        let state = self.state.lock();
        Ok(state
            .sessions
            .iter()
            .map(|(id, s)| SessionListing {
                id: id.clone(),
                name: s.name.clone(),
                tty: s.tty.clone(),
                is_processing: false,
            })
            .collect())
    }

    async fn write(&self, session_id: &str, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        session.writes.push(text.to_string());
        Ok(())
    }

    async fn read(&self, session_id: &str, _max_lines: usize) -> Result<String> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        if session.fail_reads {
            return Err(FleetError::Collaborator("read failed".to_string()));
        }
        if session.reads.len() > 1 {
            Ok(session.reads.remove(0))
        } else {
            Ok(session.reads.first().cloned().unwrap_or_default())
        }
    }

    async fn send_control(&self, session_id: &str, ch: char) -> Result<()> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        session.controls.push(ch);
        Ok(())
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.state.lock().sessions.remove(session_id);
        Ok(())
    }

    async fn process_snapshot(&self, tty: &str) -> Result<Vec<ProcessSample>> {
        let state = self.state.lock();
        Ok(state
            .sessions
            .values()
            .filter(|s| s.tty.as_deref() == Some(tty))
            .flat_map(|s| s.samples.iter().cloned())
            .collect())
    }
}
