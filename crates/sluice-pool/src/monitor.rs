//! Periodic pool observation.
//!
//! A monitor task samples [`PoolMetrics`] on a fixed interval, always logs
//! the snapshot at info level and raises warnings when utilization or the
//! wait queue cross their thresholds. The returned [`MonitorHandle`] stops
//! the task; no tick runs after cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::instrumentation::PoolInstruments;
use crate::lifecycle::ConnectionManager;
use crate::metrics::PoolMetrics;
use crate::pool::PoolHandle;

/// Default sampling interval.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Monitor sampling interval and alert thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Time between samples.
    pub interval: Duration,
    /// Warn when utilization is strictly above this percentage.
    pub utilization_warn_percent: f64,
    /// Warn when strictly more callers than this are waiting.
    pub waiting_warn: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MONITOR_INTERVAL,
            utilization_warn_percent: 80.0,
            waiting_warn: 10,
        }
    }
}

impl MonitorConfig {
    /// Set the sampling interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the utilization warning threshold.
    #[must_use]
    pub fn utilization_warn_percent(mut self, percent: f64) -> Self {
        self.utilization_warn_percent = percent;
        self
    }

    /// Set the waiting-requests warning threshold.
    #[must_use]
    pub fn waiting_warn(mut self, count: u32) -> Self {
        self.waiting_warn = count;
        self
    }
}

/// A threshold crossed by a metrics sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAlert {
    /// Utilization above the warning threshold.
    HighUtilization,
    /// Too many callers waiting for a connection.
    HighWaiting,
    /// More connections than the configured maximum.
    OverCapacity,
}

/// Alerts raised by one sample. Each threshold is checked independently.
#[must_use]
pub fn evaluate(metrics: &PoolMetrics, config: &MonitorConfig) -> Vec<MonitorAlert> {
    let mut alerts = Vec::new();
    if metrics.utilization_percent > config.utilization_warn_percent {
        alerts.push(MonitorAlert::HighUtilization);
    }
    if metrics.waiting_requests > config.waiting_warn {
        alerts.push(MonitorAlert::HighWaiting);
    }
    if metrics.is_over_capacity() {
        alerts.push(MonitorAlert::OverCapacity);
    }
    alerts
}

/// Log one sample and its alerts.
fn report(pool: &str, metrics: &PoolMetrics, alerts: &[MonitorAlert]) {
    for alert in alerts {
        match alert {
            MonitorAlert::HighUtilization => tracing::warn!(
                application_name = pool,
                total = metrics.total_connections,
                idle = metrics.idle_connections,
                active = metrics.active_connections,
                waiting = metrics.waiting_requests,
                max = metrics.max_connections,
                utilization = metrics.utilization_percent,
                "high database pool utilization"
            ),
            MonitorAlert::HighWaiting => tracing::warn!(
                application_name = pool,
                total = metrics.total_connections,
                idle = metrics.idle_connections,
                active = metrics.active_connections,
                waiting = metrics.waiting_requests,
                max = metrics.max_connections,
                utilization = metrics.utilization_percent,
                "high number of waiting database requests"
            ),
            MonitorAlert::OverCapacity => tracing::error!(
                application_name = pool,
                total = metrics.total_connections,
                max = metrics.max_connections,
                "database pool holds more connections than its maximum"
            ),
        }
    }

    tracing::info!(
        application_name = pool,
        total = metrics.total_connections,
        idle = metrics.idle_connections,
        active = metrics.active_connections,
        waiting = metrics.waiting_requests,
        max = metrics.max_connections,
        utilization = metrics.utilization_percent,
        "database pool metrics"
    );
}

/// Stops a running monitor.
///
/// Dropping the handle also stops the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the monitor. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("stopping database pool monitor");
        }
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of samples taken so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Cancel the monitor and wait for its task to finish.
    pub async fn stop(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "database pool monitor ended abnormally");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl<M: ConnectionManager> PoolHandle<M> {
    /// Sample metrics every `interval` with the default thresholds.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self, interval: Duration) -> MonitorHandle {
        self.start_monitoring_with(MonitorConfig::default().interval(interval))
    }

    /// Sample metrics with explicit thresholds.
    ///
    /// The first sample is taken one full interval after the call. Must be
    /// called from within a Tokio runtime.
    pub fn start_monitoring_with(&self, config: MonitorConfig) -> MonitorHandle {
        let token = CancellationToken::new();
        let ticks = Arc::new(AtomicU64::new(0));

        let period = config.interval.max(Duration::from_millis(1));
        let pool = self.clone();
        let name = self.config().application_name.clone();
        let instruments = PoolInstruments::new(&name);
        let stop = token.clone();
        let counter = Arc::clone(&ticks);

        tracing::debug!(
            application_name = %name,
            interval_ms = period.as_millis() as u64,
            "starting database pool monitor"
        );

        // Anchored to this call, not to the task's first poll.
        let start = Instant::now() + period;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let metrics = pool.metrics();
                        let alerts = evaluate(&metrics, &config);
                        report(&name, &metrics, &alerts);
                        instruments.record(&metrics);
                        counter.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        });

        MonitorHandle {
            token,
            ticks,
            task: Some(task),
        }
    }
}
