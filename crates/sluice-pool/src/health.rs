//! Liveness probing.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::Serialize;

use crate::error::PoolError;
use crate::lifecycle::ConnectionManager;
use crate::pool::PoolHandle;
use crate::query::timed;

/// Outcome of a health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    /// Whether a connection could be acquired and answered `SELECT 1`.
    pub healthy: bool,
    /// Connections held by the pool after the probe.
    pub total_count: u32,
    /// Idle connections after the probe.
    pub idle_count: u32,
    /// Callers queued for a connection after the probe.
    pub waiting_count: u32,
    /// Why the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<M: ConnectionManager> PoolHandle<M> {
    /// Probe the pool by acquiring a connection, running `SELECT 1` on it and
    /// handing it back.
    ///
    /// The connection is returned without the manager's reset hook, so a
    /// probe costs one round trip. This never fails: acquire timeouts, query
    /// errors and even panics inside the connection manager are caught,
    /// logged and reported as `healthy: false`.
    pub async fn check_health(&self) -> HealthCheckResult {
        let outcome = AssertUnwindSafe(self.probe()).catch_unwind().await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("health check panicked".to_string()),
        };
        let healthy = error.is_none();
        self.record_health_check(healthy);

        let metrics = self.metrics();
        if let Some(error) = &error {
            tracing::error!(
                application_name = %self.config().application_name,
                error = %error,
                total = metrics.total_connections,
                idle = metrics.idle_connections,
                waiting = metrics.waiting_requests,
                "database health check failed"
            );
        }

        HealthCheckResult {
            healthy,
            total_count: metrics.total_connections,
            idle_count: metrics.idle_connections,
            waiting_count: metrics.waiting_requests,
            error,
        }
    }

    async fn probe(&self) -> Result<(), PoolError> {
        let mut conn = self.get().await?;

        let ping = self.manager().ping(&mut *conn);
        if let Err(e) = timed(self.config().query_timeout, ping).await {
            if !e.is_timeout() {
                conn.mark_broken();
            }
            return Err(e);
        }

        drop(conn);
        Ok(())
    }
}
