use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{SessionState, StateTransition};
use crate::safety::SafetyTier;

/// Bookkeeping record for one terminal session. Other components refer to
/// sessions by id only; the registry owns these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub state: SessionState,
    pub tier: SafetyTier,
    pub window_ref: String,
    pub tab_ref: String,
    pub tty: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,

    #[serde(default)]
    pub state_history: Vec<StateTransition>,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            state: SessionState::Initializing,
            tier: SafetyTier::default(),
            window_ref: String::new(),
            tab_ref: String::new(),
            tty: None,
            created_at: now,
            last_active: now,
            state_history: Vec::new(),
        }
    }

    pub fn with_refs(mut self, window_ref: impl Into<String>, tab_ref: impl Into<String>) -> Self {
        self.window_ref = window_ref.into();
        self.tab_ref = tab_ref.into();
        self
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }
}
