//! Read-replica pools.

use sluice_config::PoolConfiguration;

use crate::error::PoolError;
use crate::lifecycle::ConnectionManager;
use crate::pool::Pool;

/// Build a pool for a read replica, if one is configured.
///
/// Returns `Ok(None)` when `replica_url` is absent or empty; that is the
/// normal single-database setup. Otherwise the replica pool reuses the sizing
/// and timeouts of `base`, connects to `replica_url`, and reports the
/// application tag `<base tag>-read-replica`. `make_manager` receives the
/// derived configuration so it can open connections to the replica.
///
/// The returned pool has its own lifecycle: closing the primary pool does not
/// affect it and vice versa.
pub fn create_read_replica_pool<M, F>(
    base: &PoolConfiguration,
    replica_url: Option<&str>,
    make_manager: F,
) -> Result<Option<Pool<M>>, PoolError>
where
    M: ConnectionManager,
    F: FnOnce(&PoolConfiguration) -> Result<M, PoolError>,
{
    let Some(url) = replica_url.map(str::trim).filter(|url| !url.is_empty()) else {
        tracing::info!(
            application_name = %base.application_name,
            "no read replica configured"
        );
        return Ok(None);
    };

    let config = base.for_replica(url);
    config.validate()?;
    let manager = make_manager(&config)?;

    tracing::info!(
        application_name = %config.application_name,
        "creating read replica pool"
    );
    Pool::new(manager, config).map(Some)
}
