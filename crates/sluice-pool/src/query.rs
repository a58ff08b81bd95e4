//! Client-side query timeouts.

use std::future::Future;
use std::time::Duration;

use crate::error::PoolError;

/// Run a query future with a client-side timeout.
///
/// The server-side `statement_timeout` still applies; this bounds the wait
/// when the server or network misbehaves. A timed-out connection remains
/// usable.
///
/// ```rust,ignore
/// let mut conn = pool.get().await?;
/// let rows = timed(conn.query_timeout(), conn.query("SELECT 1", &[])).await?;
/// ```
pub async fn timed<T, E, F>(limit: Duration, query: F) -> Result<T, PoolError>
where
    F: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PoolError::Query(Box::new(e))),
        Err(_) => Err(PoolError::QueryTimeout { timeout: limit }),
    }
}
