use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::debug;

use super::backend::TerminalBackend;
use crate::error::Result;

/// Strategy for waiting out the gap between writing a command and the
/// terminal having produced its output. There is no completion signal from
/// the backend, so this is inherently heuristic; the strategy is injectable
/// so callers can tune it or replace it outright.
#[async_trait]
pub trait SettleStrategy: Send + Sync {
    async fn settle(&self, backend: &Arc<dyn TerminalBackend>, session_id: &str) -> Result<()>;
}

/// Sleep a constant delay. The reference behavior.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl SettleStrategy for FixedDelay {
    async fn settle(&self, _backend: &Arc<dyn TerminalBackend>, _session_id: &str) -> Result<()> {
        sleep(self.delay).await;
        Ok(())
    }
}

/// Re-read the tail of the screen buffer until two consecutive reads match
/// or the wait budget is spent. Tolerates read errors mid-poll (the final
/// read after settling is the one that matters to callers).
#[derive(Debug, Clone)]
pub struct PollUntilStable {
    pub interval: Duration,
    pub max_wait: Duration,
    pub probe_lines: usize,
}

impl Default for PollUntilStable {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_wait: Duration::from_secs(10),
            probe_lines: 5,
        }
    }
}

#[async_trait]
impl SettleStrategy for PollUntilStable {
    async fn settle(&self, backend: &Arc<dyn TerminalBackend>, session_id: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.max_wait;
        let mut previous: Option<String> = None;

        loop {
            sleep(self.interval).await;

            match backend.read(session_id, self.probe_lines).await {
                Ok(current) => {
                    if previous.as_deref() == Some(current.as_str()) {
                        return Ok(());
                    }
                    previous = Some(current);
                }
                Err(e) => {
                    debug!(session_id, error = %e, "settle probe read failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                debug!(session_id, "settle wait budget spent, proceeding");
                return Ok(());
            }
        }
    }
}
