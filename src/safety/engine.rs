use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};

use super::policy::{PolicyOverride, SafetyPolicy, SafetyTier};
use super::types::{
    CommandApproval, ExecutionOutcome, SafetyCheck, SafetyViolation, ViolationKind,
};
use crate::config::SafetyConfig;
use crate::error::{FleetError, Result};
use crate::monitor::PerformanceMonitor;
use crate::session::SessionRegistry;
use crate::terminal::{FixedDelay, SettleStrategy};
use crate::utils::{short_id, truncate_with_marker};

/// Patterns denied regardless of tier: destructive filesystem operations,
/// pipe-to-shell, raw device writes, fork bombs.
fn dangerous_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"rm\s+-[A-Za-z]*[rf][A-Za-z]*\s+(/|~|\*)",
            r"\bmkfs(\.[a-z0-9]+)?\b",
            r":\(\)\s*\{.*\};\s*:",
            r"\b(curl|wget)\b.*\|\s*(ba|z|fi)?sh\b",
            r"\bdd\b.*\bof=/dev/",
            r">\s*/dev/(sd|hd|nvme|disk)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("dangerous pattern must compile"))
        .collect()
    })
}

/// Validates commands against each session's effective policy, manages the
/// approval workflow, and performs guarded execution through the terminal
/// backend.
pub struct SafetyEngine {
    registry: Arc<SessionRegistry>,
    settle: Arc<dyn SettleStrategy>,
    config: SafetyConfig,
    monitor: Option<Arc<PerformanceMonitor>>,
    overrides: RwLock<HashMap<String, PolicyOverride>>,
    violations: RwLock<VecDeque<SafetyViolation>>,
    approvals: RwLock<ApprovalStore>,
}

#[derive(Default)]
struct ApprovalStore {
    records: HashMap<String, CommandApproval>,
    order: VecDeque<String>,
}

impl ApprovalStore {
    fn insert(&mut self, approval: CommandApproval, cap: usize) {
        self.order.push_back(approval.id.clone());
        self.records.insert(approval.id.clone(), approval);
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &str) -> Option<CommandApproval> {
        self.order.retain(|entry| entry != id);
        self.records.remove(id)
    }
}

impl SafetyEngine {
    pub fn new(registry: Arc<SessionRegistry>, config: SafetyConfig) -> Self {
        let settle = Arc::new(FixedDelay::new(Duration::from_millis(config.settle_delay_ms)));
        Self {
            registry,
            settle,
            config,
            monitor: None,
            overrides: RwLock::new(HashMap::new()),
            violations: RwLock::new(VecDeque::new()),
            approvals: RwLock::new(ApprovalStore::default()),
        }
    }

    /// Replaces the wait-for-output strategy used between write and read.
    pub fn with_settle_strategy(mut self, settle: Arc<dyn SettleStrategy>) -> Self {
        self.settle = settle;
        self
    }

    /// Wires command/error accounting into the performance monitor.
    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Binds a tier to a session. Idempotent: re-binding the same tier
    /// leaves the effective policy unchanged.
    pub fn set_session_tier(&self, session_id: &str, tier: SafetyTier) -> Result<()> {
        self.registry.set_tier(session_id, tier)
    }

    /// Applies a field-by-field override on top of the session's tier preset.
    pub fn override_policy(&self, session_id: &str, ov: PolicyOverride) {
        self.overrides.write().insert(session_id.to_string(), ov);
    }

    /// Effective policy for a session: its tier preset plus any override.
    /// Unknown sessions fall back to the default tier.
    pub fn effective_policy(&self, session_id: &str) -> SafetyPolicy {
        let tier = self.registry.tier_of(session_id).unwrap_or_default();
        let policy = SafetyPolicy::for_tier(tier);
        match self.overrides.read().get(session_id) {
            Some(ov) => policy.with_override(ov),
            None => policy,
        }
    }

    /// Evaluates a command against the session's policy. Fixed
    /// short-circuit order: length, deny-list, tier-invariant dangerous
    /// patterns, allow-list, approval flag. An allow-list miss under an
    /// approval-requiring tier parks the command for approval instead of
    /// rejecting it.
    pub fn check_command(&self, session_id: &str, command: &str) -> SafetyCheck {
        let policy = self.effective_policy(session_id);

        if command.len() > policy.max_command_length {
            let message = format!(
                "command length {} exceeds maximum {}",
                command.len(),
                policy.max_command_length
            );
            self.record_violation(SafetyViolation::new(
                session_id,
                truncate_with_marker(command, policy.max_command_length),
                ViolationKind::LengthExceeded,
                &message,
            ));
            return SafetyCheck::denied(ViolationKind::LengthExceeded, message);
        }

        for blocked in &policy.blocked_substrings {
            if command.contains(blocked.as_str()) {
                let message = format!("command contains blocked pattern: {}", blocked);
                self.record_violation(SafetyViolation::new(
                    session_id,
                    command,
                    ViolationKind::BlockedSubstring,
                    &message,
                ));
                return SafetyCheck::denied(ViolationKind::BlockedSubstring, message);
            }
        }

        for pattern in dangerous_patterns() {
            if pattern.is_match(command) {
                let message = format!("command matches dangerous pattern: {}", pattern.as_str());
                self.record_violation(SafetyViolation::new(
                    session_id,
                    command,
                    ViolationKind::DangerousPattern,
                    &message,
                ));
                return SafetyCheck::denied(ViolationKind::DangerousPattern, message);
            }
        }

        match policy.allows(command) {
            Some(true) => SafetyCheck::allowed(),
            Some(false) if policy.require_approval => SafetyCheck::needs_approval(),
            Some(false) => {
                let message = "command not on the session allow-list".to_string();
                self.record_violation(SafetyViolation::new(
                    session_id,
                    command,
                    ViolationKind::NotAllowed,
                    &message,
                ));
                SafetyCheck::denied(ViolationKind::NotAllowed, message)
            }
            // No allow-list configured: the approval flag alone decides.
            None if policy.require_approval => SafetyCheck::needs_approval(),
            None => SafetyCheck::allowed(),
        }
    }

    /// Checks the command and, when allowed, runs it through the backend:
    /// write, settle, read trailing output.
    ///
    /// Denials come back as a failed [`ExecutionOutcome`]; a command that
    /// needs approval fails with [`FleetError::ApprovalRequired`] carrying a
    /// freshly minted approval id. Each approval authorizes exactly one
    /// execution.
    pub async fn execute_with_safety(
        &self,
        session_id: &str,
        command: &str,
        approval_id: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let check = self.check_command(session_id, command);

        if !check.safe {
            let kind = check
                .violation
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Ok(ExecutionOutcome::failed(format!(
                "denied by policy ({}): {}",
                kind,
                check.message.unwrap_or_default()
            )));
        }

        if check.requires_approval {
            match approval_id {
                Some(id) => self.consume_approval(id, session_id, command)?,
                None => {
                    let approval_id = self.request_approval(session_id, command);
                    return Err(FleetError::ApprovalRequired { approval_id });
                }
            }
        }

        self.run_command(session_id, command).await
    }

    async fn run_command(&self, session_id: &str, command: &str) -> Result<ExecutionOutcome> {
        let backend = self.registry.backend();
        self.registry.touch(session_id);

        if let Err(e) = backend.write(session_id, &format!("{}\n", command)).await {
            if let Some(monitor) = &self.monitor {
                monitor.record_error(session_id);
            }
            return Err(e);
        }

        self.settle.settle(&backend, session_id).await?;

        let output = match backend.read(session_id, self.config.read_lines).await {
            Ok(output) => output,
            Err(e) => {
                if let Some(monitor) = &self.monitor {
                    monitor.record_error(session_id);
                }
                return Err(e);
            }
        };

        if let Some(monitor) = &self.monitor {
            monitor.record_command(session_id);
        }

        debug!(session_id, command, "command executed");
        Ok(ExecutionOutcome::ok(output))
    }

    /// Mints a pending approval record and returns its id.
    pub fn request_approval(&self, session_id: &str, command: &str) -> String {
        let tier = self.registry.tier_of(session_id).unwrap_or_default();
        let id = format!("appr-{}", short_id());
        let approval = CommandApproval::new(&id, session_id, command, tier);

        info!(approval_id = %id, session_id, "command parked for approval");
        self.approvals.write().insert(approval, self.config.max_approvals);
        id
    }

    pub fn approve_command(&self, approval_id: &str, approver: &str) -> Result<CommandApproval> {
        let mut store = self.approvals.write();
        let approval = store
            .records
            .get_mut(approval_id)
            .ok_or_else(|| FleetError::ApprovalInvalid(format!("unknown approval: {}", approval_id)))?;

        approval.approved = true;
        approval.approved_by = Some(approver.to_string());
        info!(approval_id, approver, "command approved");
        Ok(approval.clone())
    }

    /// Rejects and deletes the approval record; the id can never authorize
    /// an execution afterwards.
    pub fn reject_command(&self, approval_id: &str, reason: &str) -> Result<()> {
        let mut store = self.approvals.write();
        let mut approval = store
            .remove(approval_id)
            .ok_or_else(|| FleetError::ApprovalInvalid(format!("unknown approval: {}", approval_id)))?;

        approval.rejection_reason = Some(reason.to_string());
        warn!(approval_id, reason, session_id = %approval.session_id, "command rejected");
        Ok(())
    }

    fn consume_approval(&self, approval_id: &str, session_id: &str, command: &str) -> Result<()> {
        let mut store = self.approvals.write();
        let approval = store
            .records
            .get_mut(approval_id)
            .ok_or_else(|| FleetError::ApprovalInvalid(format!("unknown approval: {}", approval_id)))?;

        if !approval.approved {
            return Err(FleetError::ApprovalInvalid(format!(
                "approval {} has not been granted",
                approval_id
            )));
        }
        if approval.consumed {
            return Err(FleetError::ApprovalInvalid(format!(
                "approval {} was already used",
                approval_id
            )));
        }
        if approval.session_id != session_id || approval.command != command {
            return Err(FleetError::ApprovalInvalid(format!(
                "approval {} does not match this command",
                approval_id
            )));
        }

        approval.consumed = true;
        Ok(())
    }

    pub fn pending_approvals(&self) -> Vec<CommandApproval> {
        let store = self.approvals.read();
        store
            .order
            .iter()
            .filter_map(|id| store.records.get(id))
            .filter(|a| !a.approved)
            .cloned()
            .collect()
    }

    pub fn approval(&self, approval_id: &str) -> Option<CommandApproval> {
        self.approvals.read().records.get(approval_id).cloned()
    }

    /// Violations in insertion order, oldest first.
    pub fn violations(&self) -> Vec<SafetyViolation> {
        self.violations.read().iter().cloned().collect()
    }

    fn record_violation(&self, violation: SafetyViolation) {
        warn!(
            session_id = %violation.session_id,
            kind = %violation.kind,
            "safety violation: {}",
            violation.message
        );
        let mut log = self.violations.write();
        log.push_back(violation);
        while log.len() > self.config.max_violations {
            log.pop_front();
        }
    }
}
