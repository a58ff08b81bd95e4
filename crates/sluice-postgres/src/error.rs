//! PostgreSQL integration errors.

use sluice_pool::PoolError;
use thiserror::Error;

/// Errors building the TLS connector.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// The CA bundle is not valid PEM.
    #[error("failed to read CA certificates: {0}")]
    Pem(#[source] std::io::Error),

    /// The CA bundle holds no certificates.
    #[error("CA bundle contains no certificates")]
    NoCertificates,

    /// A certificate was rejected or the TLS configuration is invalid.
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Errors setting up PostgreSQL pools.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PostgresError {
    /// The connection target could not be turned into client options.
    #[error("invalid connection target: {0}")]
    InvalidTarget(#[source] tokio_postgres::Error),

    /// TLS could not be configured.
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// Pool creation or shutdown failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<PostgresError> for PoolError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Pool(inner) => inner,
            other => PoolError::Connect(Box::new(other)),
        }
    }
}
