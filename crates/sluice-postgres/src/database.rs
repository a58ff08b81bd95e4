//! Process-wide database state.
//!
//! A service builds one [`Database`] at startup and passes it (or the pool
//! handles it exposes) to whatever needs database access. On SIGINT or
//! SIGTERM it calls [`Database::shutdown`] exactly once; the method consumes
//! the value, so pools cannot be used or closed again afterwards.

use sluice_config::{ConnectionInputs, PoolConfiguration};
use sluice_pool::{
    ConnectionManager, HealthCheckResult, MonitorConfig, MonitorHandle, Pool, PoolError,
    PoolHandle, create_read_replica_pool,
};

use crate::error::PostgresError;
use crate::manager::PostgresManager;

/// Primary pool, optional read-replica pool and their monitors.
pub struct Database<M: ConnectionManager = PostgresManager> {
    primary: Pool<M>,
    replica: Option<Pool<M>>,
    monitors: Vec<MonitorHandle>,
}

impl Database<PostgresManager> {
    /// Resolve the configuration from the process environment and create the
    /// pools.
    ///
    /// No connection is opened yet. Must be called from within a Tokio
    /// runtime so the pools can reap idle connections.
    pub fn from_env() -> Result<Self, PostgresError> {
        Self::from_inputs(&ConnectionInputs::from_env())
    }

    /// Create the pools from raw inputs.
    pub fn from_inputs(inputs: &ConnectionInputs) -> Result<Self, PostgresError> {
        let config = PoolConfiguration::resolve(inputs);
        let primary = Pool::new(PostgresManager::new(&config)?, config.clone())?;
        let replica = create_read_replica_pool(
            &config,
            inputs.read_replica_url.as_deref(),
            |replica| PostgresManager::new(replica).map_err(PoolError::from),
        )?;

        Ok(Self::new(primary, replica))
    }
}

impl<M: ConnectionManager> Database<M> {
    /// Assemble the state from already-built pools.
    pub fn new(primary: Pool<M>, replica: Option<Pool<M>>) -> Self {
        Self {
            primary,
            replica,
            monitors: Vec::new(),
        }
    }

    /// The primary pool.
    #[must_use]
    pub fn primary(&self) -> &PoolHandle<M> {
        &self.primary
    }

    /// The read-replica pool, if configured.
    #[must_use]
    pub fn replica(&self) -> Option<&PoolHandle<M>> {
        self.replica.as_deref()
    }

    /// Pool for read-only queries: the replica when configured, otherwise the
    /// primary.
    #[must_use]
    pub fn reader(&self) -> &PoolHandle<M> {
        self.replica().unwrap_or(&*self.primary)
    }

    /// Start monitoring every pool, replacing any running monitors.
    pub fn start_monitoring(&mut self, config: MonitorConfig) {
        for monitor in self.monitors.drain(..) {
            monitor.cancel();
        }
        self.monitors
            .push(self.primary.start_monitoring_with(config.clone()));
        if let Some(replica) = &self.replica {
            self.monitors.push(replica.start_monitoring_with(config));
        }
    }

    /// Probe the primary pool.
    pub async fn check_health(&self) -> HealthCheckResult {
        self.primary.check_health().await
    }

    /// Stop the monitors and close both pools.
    ///
    /// Both pools are closed even if the first close fails; the first error
    /// is returned.
    pub async fn shutdown(self) -> Result<(), PoolError> {
        tracing::info!("shutting down database pools");

        for monitor in self.monitors {
            monitor.stop().await;
        }

        let replica = match self.replica {
            Some(replica) => replica.close().await,
            None => Ok(()),
        };
        let primary = self.primary.close().await;

        primary.and(replica)
    }
}

/// Complete when the process receives SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, initiating graceful shutdown");
        },
        () = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown");
        },
    }
}
