//! Pool error types.

use std::time::Duration;

use sluice_config::ConfigError;
use thiserror::Error;

/// Boxed error returned by a connection manager.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by pool operations.
///
/// Errors on idle connections are never reported through this type; they
/// are contained at the pool boundary and delivered to the registered
/// [`PoolEventHandler`](crate::PoolEventHandler) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool is closing or closed and accepts no more checkouts.
    #[error("connection pool is closed")]
    Closed,

    /// No connection became available within the acquire timeout.
    #[error("timed out after {timeout:?} waiting for a connection")]
    ConnectionTimeout {
        /// The configured acquire timeout.
        timeout: Duration,
    },

    /// A query did not finish within the query timeout.
    #[error("query timed out after {timeout:?}")]
    QueryTimeout {
        /// The configured query timeout.
        timeout: Duration,
    },

    /// Opening a new physical connection failed.
    #[error("failed to open connection: {0}")]
    Connect(#[source] BoxError),

    /// A query issued through the pool failed.
    #[error("query failed: {0}")]
    Query(#[source] BoxError),

    /// Resetting a connection on release failed; the connection was dropped.
    #[error("failed to reset connection: {0}")]
    Reset(#[source] BoxError),

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// Leased connections were still outstanding when the shutdown timeout
    /// elapsed. The pool is closed regardless.
    #[error("pool shutdown timed out with {outstanding} connection(s) still leased")]
    Shutdown {
        /// Connections that had not been returned.
        outstanding: u32,
    },
}

impl PoolError {
    /// Whether retrying the operation after a back-off may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::QueryTimeout { .. } | Self::Connect(_)
        )
    }

    /// Whether this error is a timeout of any kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::QueryTimeout { .. }
        )
    }
}
