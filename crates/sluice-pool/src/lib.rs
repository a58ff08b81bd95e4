//! # sluice-pool
//!
//! Bounded async connection pool with health checks, metrics and a
//! cancellable monitor.
//!
//! The pool is generic over a [`ConnectionManager`], which knows how to open,
//! probe and reset physical connections for one wire client. Everything else
//! (sizing, FIFO queueing, idle reaping, shutdown) lives here.
//!
//! ## Features
//!
//! - Lazy connection creation bounded by `max_connections`
//! - FIFO acquisition with a hard acquire timeout
//! - Session settings (`statement_timeout`, `lock_timeout`,
//!   `idle_in_transaction_session_timeout`) applied to every new connection
//! - Lifecycle observers with panic containment
//! - Idle connection errors contained at the pool boundary
//! - Health checks that never fail
//! - Utilization snapshots and a periodic monitor with threshold warnings
//! - Independent read-replica pools
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_config::PoolConfiguration;
//! use sluice_pool::Pool;
//! use std::time::Duration;
//!
//! let pool = Pool::new(manager, PoolConfiguration::from_env())?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//! drop(conn);
//!
//! let health = pool.check_health().await;
//! println!("healthy: {}", health.healthy);
//!
//! let monitor = pool.start_monitoring(Duration::from_secs(60));
//! // ...
//! monitor.cancel();
//! pool.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod health;
pub mod instrumentation;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod query;
pub mod replica;

// Error types
pub use error::{BoxError, PoolError};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolCounters, PoolHandle, PoolState, PooledConnection};

// Lifecycle management
pub use events::{ConnectionEvent, PoolEventHandler, TracingEvents};
pub use lifecycle::{
    ConnectionManager, ConnectionMetadata, ConnectionState, IdleErrorSink,
};

// Observation
pub use health::HealthCheckResult;
pub use metrics::PoolMetrics;
pub use monitor::{MonitorAlert, MonitorConfig, MonitorHandle};

pub use query::timed;
pub use replica::create_read_replica_pool;

// Re-export the configuration crate for convenience.
pub use sluice_config;
