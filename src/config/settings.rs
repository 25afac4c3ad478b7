use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{FleetError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub session: SessionConfig,
    pub safety: SafetyConfig,
    pub recovery: RecoveryConfig,
    pub monitor: MonitorConfig,
}

impl FleetConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self).map_err(|e| FleetError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency; collects every
    /// problem instead of stopping at the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.session.state_history_cap == 0 {
            errors.push("session.state_history_cap must be greater than 0");
        }

        if self.safety.max_violations == 0 {
            errors.push("safety.max_violations must be greater than 0");
        }
        if self.safety.max_approvals == 0 {
            errors.push("safety.max_approvals must be greater than 0");
        }
        if self.safety.read_lines == 0 {
            errors.push("safety.read_lines must be greater than 0");
        }

        if self.recovery.operation_timeout_secs == 0 {
            errors.push("recovery.operation_timeout_secs must be greater than 0");
        }
        if self.recovery.backoff_multiplier < 1.0 {
            errors.push("recovery.backoff_multiplier must be at least 1.0");
        }
        if self.recovery.health_check_interval_secs == 0 {
            errors.push("recovery.health_check_interval_secs must be greater than 0");
        }

        if self.monitor.sample_interval_secs == 0 {
            errors.push("monitor.sample_interval_secs must be greater than 0");
        }
        if self.monitor.metrics_history_cap == 0 {
            errors.push("monitor.metrics_history_cap must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.monitor.error_rate_warning) {
            errors.push("monitor.error_rate_warning must be between 0.0 and 1.0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transitions kept per session before the oldest are dropped.
    pub state_history_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_history_cap: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Most-recent violations retained in the audit log.
    pub max_violations: usize,
    /// Most-recent approval records retained.
    pub max_approvals: usize,
    /// Settle delay between write and read, for the fixed-delay strategy.
    pub settle_delay_ms: u64,
    /// Trailing screen-buffer lines captured after a command.
    pub read_lines: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_violations: 100,
            max_approvals: 100,
            settle_delay_ms: 1500,
            read_lines: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub operation_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// Error contexts retained per session's health record.
    pub health_history_cap: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            backoff_multiplier: 2.0,
            operation_timeout_secs: 60,
            health_check_interval_secs: 30,
            health_history_cap: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_interval_secs: u64,
    /// Metric snapshots retained per session and fleet-wide.
    pub metrics_history_cap: usize,
    /// Alerts retained, trimmed oldest-first.
    pub alerts_cap: usize,

    pub cpu_warning_percent: f64,
    pub memory_warning_percent: f64,
    pub response_time_warning_ms: u64,
    pub total_cpu_critical_percent: f64,
    pub total_memory_critical_percent: f64,
    /// Errors per command over the sliding window, 0.0..=1.0.
    pub error_rate_warning: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 5,
            metrics_history_cap: 120,
            alerts_cap: 100,
            cpu_warning_percent: 80.0,
            memory_warning_percent: 75.0,
            response_time_warning_ms: 10_000,
            total_cpu_critical_percent: 90.0,
            total_memory_critical_percent: 85.0,
            error_rate_warning: 0.25,
        }
    }
}
