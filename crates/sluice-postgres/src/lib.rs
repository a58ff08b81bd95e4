//! # sluice-postgres
//!
//! PostgreSQL support for sluice pools.
//!
//! - [`PostgresManager`]: a [`ConnectionManager`](sluice_pool::ConnectionManager)
//!   over `tokio-postgres`, with rustls TLS when the environment requires it
//! - [`Database`]: the process-wide pool state, built once at startup and
//!   shut down once on SIGINT/SIGTERM
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice_postgres::{Database, shutdown_signal};
//! use sluice_pool::MonitorConfig;
//!
//! # async fn run() -> Result<(), sluice_postgres::PostgresError> {
//! let mut db = Database::from_env()?;
//! db.start_monitoring(MonitorConfig::default());
//!
//! let health = db.check_health().await;
//! println!("healthy: {}", health.healthy);
//!
//! shutdown_signal().await;
//! db.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod manager;
pub mod tls;

pub use database::{Database, shutdown_signal};
pub use error::{PostgresError, TlsError};
pub use manager::PostgresManager;
pub use tls::RustlsConnect;

/// Client type handed out by [`PostgresManager`] pools.
pub use tokio_postgres::Client;
