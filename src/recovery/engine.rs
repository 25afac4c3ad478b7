use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::types::{ErrorContext, ErrorKind, SessionHealth};
use crate::config::RecoveryConfig;
use crate::error::{FleetError, Result};
use crate::session::SessionRegistry;

/// Control character sent to interrupt a stuck command (ctrl-C).
const INTERRUPT: char = 'c';

/// Consecutive probe failures before a session is forced into the error
/// state.
const FORCE_ERROR_AFTER: u32 = 3;

/// Wraps session-scoped operations with timeout, typed-error
/// classification, and per-kind recovery policies; runs the periodic
/// health sweep.
pub struct RecoveryEngine {
    registry: Arc<SessionRegistry>,
    config: RecoveryConfig,
    health: RwLock<HashMap<String, SessionHealth>>,
}

impl RecoveryEngine {
    pub fn new(registry: Arc<SessionRegistry>, config: RecoveryConfig) -> Self {
        Self {
            registry,
            config,
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Applies the recovery policy for the error's kind. Returns whether
    /// the session looks usable again. Does nothing when the context is
    /// not recoverable or its retry budget is spent.
    pub async fn handle_error(&self, ctx: &ErrorContext) -> bool {
        self.record(ctx);

        if !ctx.recoverable || ctx.retry_count >= self.config.max_retries {
            if ctx.kind == ErrorKind::SessionLost {
                self.mark_unhealthy(&ctx.session_id);
            }
            debug!(
                session_id = %ctx.session_id,
                kind = %ctx.kind,
                retry_count = ctx.retry_count,
                "not attempting recovery"
            );
            return false;
        }

        info!(session_id = %ctx.session_id, kind = %ctx.kind, "attempting recovery");

        let recovered = match ctx.kind {
            ErrorKind::Timeout => {
                sleep(self.backoff_delay(ctx.retry_count)).await;
                self.interrupt(&ctx.session_id).await;
                self.probe(&ctx.session_id).await
            }
            ErrorKind::Crash => {
                if !self.session_alive(&ctx.session_id).await {
                    self.mark_unhealthy(&ctx.session_id);
                    return false;
                }
                self.interrupt(&ctx.session_id).await;
                self.probe(&ctx.session_id).await
            }
            // Transient by assumption: wait it out and re-check.
            ErrorKind::Network => {
                sleep(self.backoff_delay(ctx.retry_count)).await;
                self.probe(&ctx.session_id).await
            }
            ErrorKind::CommandFailed => {
                self.interrupt(&ctx.session_id).await;
                let backend = self.registry.backend();
                if let Err(e) = backend.write(&ctx.session_id, "clear\n").await {
                    debug!(session_id = %ctx.session_id, error = %e, "clear command failed");
                }
                self.probe(&ctx.session_id).await
            }
            ErrorKind::SessionLost => {
                self.mark_unhealthy(&ctx.session_id);
                false
            }
        };

        if recovered {
            self.mark_healthy(&ctx.session_id);
        } else {
            self.mark_unhealthy(&ctx.session_id);
        }
        recovered
    }

    /// Runs `op` under a timeout, retrying with exponential backoff.
    ///
    /// Failures are classified as `Timeout` when the deadline elapsed and
    /// as `default_kind` otherwise, then handed to [`Self::handle_error`].
    /// A non-recoverable failure aborts after the first attempt; exhausting
    /// the budget re-raises the last error.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        session_id: &str,
        op: F,
        default_kind: ErrorKind,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op_timeout = Duration::from_secs(self.config.operation_timeout_secs);
        let mut last_err: Option<FleetError> = None;

        for attempt in 0..=self.config.max_retries {
            let (kind, err) = match timeout(op_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => (default_kind, e),
                Err(_) => (
                    ErrorKind::Timeout,
                    FleetError::Timeout {
                        operation: format!("session {} operation", session_id),
                        secs: self.config.operation_timeout_secs,
                    },
                ),
            };

            let ctx = ErrorContext::new(session_id, kind, err.to_string())
                .with_retry_count(attempt);
            let recoverable = ctx.recoverable;
            let recovered = self.handle_error(&ctx).await;
            last_err = Some(err);

            if !recoverable {
                break;
            }

            if attempt < self.config.max_retries {
                if !recovered {
                    sleep(self.backoff_delay(attempt)).await;
                }
                debug!(session_id, attempt = attempt + 1, "retrying operation");
            }
        }

        Err(last_err.unwrap_or(FleetError::Unrecoverable(format!(
            "session {} operation failed without error detail",
            session_id
        ))))
    }

    /// Probes every known session concurrently and updates its health
    /// record. Sessions failing [`FORCE_ERROR_AFTER`] consecutive probes
    /// are forced into the error state.
    pub async fn check_all(&self) -> Vec<SessionHealth> {
        let sessions = self.registry.enumerate().await;

        let probes = sessions.iter().map(|session| {
            let id = session.id.clone();
            async move { (id.clone(), self.probe(&id).await) }
        });
        let results = join_all(probes).await;

        for (session_id, ok) in &results {
            if *ok {
                self.mark_healthy(session_id);
            } else {
                self.mark_unhealthy(session_id);
                let failures = self
                    .health
                    .read()
                    .get(session_id)
                    .map(|h| h.consecutive_failures)
                    .unwrap_or(0);
                if failures >= FORCE_ERROR_AFTER {
                    if let Err(e) = self.registry.force_error(session_id, "health sweep failures") {
                        debug!(session_id, error = %e, "could not force error state");
                    }
                }
            }
        }

        self.health.read().values().cloned().collect()
    }

    /// Spawns the periodic health sweep.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = Duration::from_secs(self.config.health_check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                engine.check_all().await;
            }
        })
    }

    pub fn session_health(&self, session_id: &str) -> Option<SessionHealth> {
        self.health.read().get(session_id).cloned()
    }

    pub fn all_health(&self) -> Vec<SessionHealth> {
        self.health.read().values().cloned().collect()
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let millis =
            self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64)
    }

    /// Lightweight liveness probe: one line of output plus presence in the
    /// live fleet listing.
    async fn probe(&self, session_id: &str) -> bool {
        let backend = self.registry.backend();
        let readable = backend.read(session_id, 1).await.is_ok();
        readable && self.session_alive(session_id).await
    }

    async fn session_alive(&self, session_id: &str) -> bool {
        let backend = self.registry.backend();
        match backend.list_sessions().await {
            Ok(listings) => listings.iter().any(|l| l.id == session_id),
            Err(e) => {
                warn!(session_id, error = %e, "fleet listing failed during probe");
                false
            }
        }
    }

    async fn interrupt(&self, session_id: &str) {
        let backend = self.registry.backend();
        if let Err(e) = backend.send_control(session_id, INTERRUPT).await {
            debug!(session_id, error = %e, "interrupt failed");
        }
    }

    fn record(&self, ctx: &ErrorContext) {
        let mut health = self.health.write();
        let entry = health
            .entry(ctx.session_id.clone())
            .or_insert_with(|| SessionHealth::new(&ctx.session_id));
        entry.record_error(ctx.clone(), self.config.health_history_cap);
    }

    fn mark_healthy(&self, session_id: &str) {
        let mut health = self.health.write();
        health
            .entry(session_id.to_string())
            .or_insert_with(|| SessionHealth::new(session_id))
            .mark_healthy();
    }

    fn mark_unhealthy(&self, session_id: &str) {
        let mut health = self.health.write();
        health
            .entry(session_id.to_string())
            .or_insert_with(|| SessionHealth::new(session_id))
            .mark_unhealthy();
    }
}
