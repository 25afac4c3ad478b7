use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::types::{
    AlertCategory, AlertSeverity, PerformanceAlert, PerformanceMetrics, SystemMetrics,
};
use crate::config::MonitorConfig;
use crate::session::{Session, SessionRegistry};

/// Sliding window over which command/error rates are computed.
const RATE_WINDOW_SECS: i64 = 60;

#[derive(Default)]
struct MonitorState {
    session_metrics: HashMap<String, VecDeque<PerformanceMetrics>>,
    system_metrics: VecDeque<SystemMetrics>,
    alerts: VecDeque<PerformanceAlert>,
    command_events: VecDeque<(DateTime<Utc>, String)>,
    error_events: VecDeque<(DateTime<Utc>, String)>,
    command_totals: HashMap<String, u64>,
    error_totals: HashMap<String, u64>,
}

impl MonitorState {
    fn prune_windows(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(RATE_WINDOW_SECS);
        while self.command_events.front().is_some_and(|(at, _)| *at < cutoff) {
            self.command_events.pop_front();
        }
        while self.error_events.front().is_some_and(|(at, _)| *at < cutoff) {
            self.error_events.pop_front();
        }
    }

    fn push_alert(&mut self, alert: PerformanceAlert, cap: usize) {
        info!(
            severity = %alert.severity,
            value = alert.value,
            threshold = alert.threshold,
            "performance alert: {}",
            alert.message
        );
        self.alerts.push_back(alert);
        while self.alerts.len() > cap {
            self.alerts.pop_front();
        }
    }
}

/// Samples session and fleet resource usage, keeping bounded histories and
/// raising alerts when configured thresholds are breached.
pub struct PerformanceMonitor {
    registry: Arc<SessionRegistry>,
    config: MonitorConfig,
    state: RwLock<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(registry: Arc<SessionRegistry>, config: MonitorConfig) -> Self {
        Self {
            registry,
            config,
            state: RwLock::new(MonitorState::default()),
        }
    }

    /// Feed hook: a command completed in `session_id`.
    pub fn record_command(&self, session_id: &str) {
        let now = Utc::now();
        let mut state = self.state.write();
        state.command_events.push_back((now, session_id.to_string()));
        *state.command_totals.entry(session_id.to_string()).or_default() += 1;
        state.prune_windows(now);
    }

    /// Feed hook: a command or backend call failed in `session_id`.
    pub fn record_error(&self, session_id: &str) {
        let now = Utc::now();
        let mut state = self.state.write();
        state.error_events.push_back((now, session_id.to_string()));
        *state.error_totals.entry(session_id.to_string()).or_default() += 1;
        state.prune_windows(now);
    }

    /// One sampling pass: snapshot every session concurrently, append
    /// per-session metrics, evaluate thresholds, then publish one
    /// [`SystemMetrics`] aggregate. A slow snapshot for one session does
    /// not delay the others; the aggregate is published only after all
    /// probes have joined.
    pub async fn tick(&self) {
        let sessions = self.registry.enumerate().await;
        let backend = self.registry.backend();

        let probes = sessions.iter().map(|session| {
            let backend = Arc::clone(&backend);
            let tty = session.tty.clone();
            async move {
                match tty {
                    Some(tty) => backend.process_snapshot(&tty).await.unwrap_or_default(),
                    None => Vec::new(),
                }
            }
        });
        let samples = join_all(probes).await;

        let now = Utc::now();
        let mut total_cpu = 0.0;
        let mut total_memory = 0.0;
        let mut response_times = Vec::with_capacity(sessions.len());

        let mut state = self.state.write();
        state.prune_windows(now);

        for (session, samples) in sessions.iter().zip(samples) {
            let metrics = Self::session_metrics(session, &samples, now, &state);
            total_cpu += metrics.cpu_percent;
            total_memory += metrics.memory_percent;
            response_times.push(metrics.response_time_ms);

            self.evaluate_session_thresholds(&mut state, &metrics);

            let history = state
                .session_metrics
                .entry(session.id.clone())
                .or_default();
            history.push_back(metrics);
            while history.len() > self.config.metrics_history_cap {
                history.pop_front();
            }
        }

        let commands_per_minute = state.command_events.len() as u64;
        let error_rate = if state.command_events.is_empty() {
            0.0
        } else {
            state.error_events.len() as f64 / state.command_events.len() as f64
        };
        let average_response_time_ms = if response_times.is_empty() {
            0
        } else {
            response_times.iter().sum::<u64>() / response_times.len() as u64
        };

        let system = SystemMetrics {
            at: now,
            session_count: sessions.len(),
            total_cpu_percent: total_cpu,
            total_memory_percent: total_memory,
            average_response_time_ms,
            commands_per_minute,
            error_rate,
        };

        self.evaluate_system_thresholds(&mut state, &system);

        debug!(
            sessions = system.session_count,
            total_cpu = system.total_cpu_percent,
            error_rate = system.error_rate,
            "monitor tick"
        );

        state.system_metrics.push_back(system);
        while state.system_metrics.len() > self.config.metrics_history_cap {
            state.system_metrics.pop_front();
        }
    }

    fn session_metrics(
        session: &Session,
        samples: &[crate::terminal::ProcessSample],
        now: DateTime<Utc>,
        state: &MonitorState,
    ) -> PerformanceMetrics {
        let cpu_percent: f64 = samples.iter().map(|s| s.cpu_percent).sum();
        let memory_percent: f64 = samples.iter().map(|s| s.memory_percent).sum();
        let response_time_ms = (now - session.last_active).num_milliseconds().max(0) as u64;

        PerformanceMetrics {
            session_id: session.id.clone(),
            at: now,
            cpu_percent,
            memory_percent,
            response_time_ms,
            command_count: state.command_totals.get(&session.id).copied().unwrap_or(0),
            error_count: state.error_totals.get(&session.id).copied().unwrap_or(0),
            healthy: cpu_percent < 90.0 && memory_percent < 90.0,
        }
    }

    fn evaluate_session_thresholds(&self, state: &mut MonitorState, metrics: &PerformanceMetrics) {
        if metrics.cpu_percent > self.config.cpu_warning_percent {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Warning,
                    AlertCategory::Cpu,
                    format!("session {} CPU usage high", metrics.session_id),
                    metrics.cpu_percent,
                    self.config.cpu_warning_percent,
                )
                .for_session(&metrics.session_id),
                self.config.alerts_cap,
            );
        }
        if metrics.memory_percent > self.config.memory_warning_percent {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Warning,
                    AlertCategory::Memory,
                    format!("session {} memory usage high", metrics.session_id),
                    metrics.memory_percent,
                    self.config.memory_warning_percent,
                )
                .for_session(&metrics.session_id),
                self.config.alerts_cap,
            );
        }
        if metrics.response_time_ms > self.config.response_time_warning_ms {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Info,
                    AlertCategory::ResponseTime,
                    format!("session {} slow to respond", metrics.session_id),
                    metrics.response_time_ms as f64,
                    self.config.response_time_warning_ms as f64,
                )
                .for_session(&metrics.session_id),
                self.config.alerts_cap,
            );
        }
    }

    fn evaluate_system_thresholds(&self, state: &mut MonitorState, system: &SystemMetrics) {
        if system.total_cpu_percent > self.config.total_cpu_critical_percent {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Critical,
                    AlertCategory::Cpu,
                    "fleet CPU usage critical",
                    system.total_cpu_percent,
                    self.config.total_cpu_critical_percent,
                ),
                self.config.alerts_cap,
            );
        }
        if system.total_memory_percent > self.config.total_memory_critical_percent {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Critical,
                    AlertCategory::Memory,
                    "fleet memory usage critical",
                    system.total_memory_percent,
                    self.config.total_memory_critical_percent,
                ),
                self.config.alerts_cap,
            );
        }
        if system.error_rate > self.config.error_rate_warning {
            state.push_alert(
                PerformanceAlert::new(
                    AlertSeverity::Warning,
                    AlertCategory::ErrorRate,
                    "fleet error rate elevated",
                    system.error_rate,
                    self.config.error_rate_warning,
                ),
                self.config.alerts_cap,
            );
        }
    }

    /// Spawns the periodic sampling loop.
    pub fn spawn_sampler(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(self.config.sample_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.tick().await;
            }
        })
    }

    /// Heuristic suggestions from the latest aggregate; pure read, no
    /// state mutation.
    pub fn optimization_suggestions(&self) -> Vec<String> {
        let state = self.state.read();
        let Some(latest) = state.system_metrics.back() else {
            return Vec::new();
        };

        let mut suggestions = Vec::new();
        if latest.session_count <= 2 && latest.total_cpu_percent > self.config.cpu_warning_percent {
            suggestions.push(
                "High CPU with few sessions: investigate runaway processes before adding more work"
                    .to_string(),
            );
        }
        if latest.total_memory_percent > self.config.memory_warning_percent {
            suggestions
                .push("Memory headroom is low: close idle sessions to free resources".to_string());
        }
        if latest.error_rate > self.config.error_rate_warning {
            suggestions.push(
                "Error rate is elevated: review recent failing commands and session safety tiers"
                    .to_string(),
            );
        }
        if latest.average_response_time_ms > self.config.response_time_warning_ms {
            suggestions.push(
                "Sessions are responding slowly: reduce per-session workload or settle delay"
                    .to_string(),
            );
        }
        suggestions
    }

    pub fn session_report(&self, session_id: &str) -> Vec<PerformanceMetrics> {
        self.state
            .read()
            .session_metrics
            .get(session_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_system(&self) -> Option<SystemMetrics> {
        self.state.read().system_metrics.back().cloned()
    }

    pub fn system_report(&self) -> Vec<SystemMetrics> {
        self.state.read().system_metrics.iter().cloned().collect()
    }

    /// Alerts in insertion order, oldest first.
    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.state.read().alerts.iter().cloned().collect()
    }
}
