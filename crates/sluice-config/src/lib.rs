//! # sluice-config
//!
//! Environment-aware configuration for PostgreSQL connection pools.
//!
//! A deployment supplies a handful of environment variables (`NODE_ENV`,
//! `DATABASE_HOST`, `DATABASE_PORT`, ...). This crate turns them into a fully
//! populated [`PoolConfiguration`] using a fixed per-environment tuning table:
//!
//! | Environment | min | max | connect | idle | statement | query | TLS |
//! |---|---|---|---|---|---|---|---|
//! | production | 10 | 100 | 5s | 30s | 30s | 30s | verified |
//! | staging | 5 | 50 | 5s | 30s | 30s | 30s | off |
//! | test | 1 | 5 | 3s | 10s | 10s | 10s | off |
//! | development | 2 | 20 | 5s | 30s | 60s | 60s | off |
//!
//! Unknown environment tags use the development row.
//!
//! ## Example
//!
//! ```rust
//! use sluice_config::{ConnectionInputs, PoolConfiguration};
//!
//! let inputs = ConnectionInputs::from_lookup(|key| match key {
//!     "NODE_ENV" => Some("production".to_string()),
//!     "DATABASE_HOST" => Some("db".to_string()),
//!     _ => None,
//! });
//! let config = PoolConfiguration::resolve(&inputs);
//!
//! assert_eq!(config.max_connections, 100);
//! assert!(config.tls.is_enabled());
//!
//! let url = config.connection_string().unwrap();
//! assert!(url.contains("connection_limit=100&pool_timeout=5"));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection_string;
pub mod environment;
pub mod error;
pub mod inputs;
pub mod session;

pub use config::{ConnectionTarget, PoolConfiguration, TlsMode};
pub use environment::{Environment, PoolTuning};
pub use error::ConfigError;
pub use inputs::ConnectionInputs;
pub use session::SessionSettings;
