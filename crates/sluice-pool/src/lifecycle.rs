//! Connection lifecycle management.
//!
//! The pool is agnostic of the wire client. A [`ConnectionManager`] knows
//! how to open a physical connection, apply session settings, probe it and
//! tell whether it is still usable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use sluice_config::SessionSettings;
use tokio::time::Instant;

use crate::events::Observers;

/// Opens and maintains physical connections for a pool.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The physical connection type.
    type Connection: Send + 'static;

    /// Error type reported by the wire client.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new physical connection.
    ///
    /// Background failures of the connection (for example a server restart
    /// while it sits idle) must be reported to `errors` rather than
    /// propagated; the pool logs them and discards the connection.
    async fn connect(&self, errors: IdleErrorSink) -> Result<Self::Connection, Self::Error>;

    /// Apply session-level settings to a freshly opened connection.
    async fn apply_session_settings(
        &self,
        conn: &mut Self::Connection,
        settings: &SessionSettings,
    ) -> Result<(), Self::Error>;

    /// Run a trivial round-trip query (`SELECT 1`).
    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;

    /// Prepare a connection for reuse when it is explicitly released.
    async fn reset(&self, _conn: &mut Self::Connection) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Cheap synchronous check that a connection is no longer usable.
    fn is_broken(&self, _conn: &Self::Connection) -> bool {
        false
    }
}

/// Bookkeeping for one pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-local connection id.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last handed out.
    pub last_checkout: Instant,
    /// How many times the connection has been handed out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_checkout: now,
            checkout_count: 0,
        }
    }

    pub(crate) fn record_checkout(&mut self) {
        self.last_checkout = Instant::now();
        self.checkout_count += 1;
    }
}

/// Where a connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Sitting idle in the pool.
    Idle,
    /// Leased to a caller.
    InUse,
    /// Marked unusable; it will be destroyed instead of reused.
    Broken,
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionFlags {
    idle: AtomicBool,
    broken: AtomicBool,
}

impl ConnectionFlags {
    pub(crate) fn state(&self) -> ConnectionState {
        if self.broken.load(Ordering::Acquire) {
            ConnectionState::Broken
        } else if self.idle.load(Ordering::Acquire) {
            ConnectionState::Idle
        } else {
            ConnectionState::InUse
        }
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
    }
}

/// Removes a failed connection from the idle set of its pool.
pub(crate) trait IdleEviction: Send + Sync {
    fn evict_broken(&self, connection_id: u64);
}

/// Reports asynchronous connection failures back to the owning pool.
///
/// Handed to [`ConnectionManager::connect`]. Reporting never panics and never
/// propagates. The connection is marked broken and, if it is sitting idle,
/// removed from the pool at once. The failure is logged and counted and the
/// pool's event handler is notified.
#[derive(Clone)]
pub struct IdleErrorSink {
    connection_id: u64,
    flags: Arc<ConnectionFlags>,
    observers: Arc<Observers>,
    pool: Weak<dyn IdleEviction>,
}

impl IdleErrorSink {
    pub(crate) fn new(
        connection_id: u64,
        flags: Arc<ConnectionFlags>,
        observers: Arc<Observers>,
        pool: Weak<dyn IdleEviction>,
    ) -> Self {
        Self {
            connection_id,
            flags,
            observers,
            pool,
        }
    }

    /// The id of the connection this sink belongs to.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Report a background failure of the connection.
    pub fn report(&self, error: &(dyn std::error::Error + 'static)) {
        let idle = self.flags.state() == ConnectionState::Idle;
        self.flags.mark_broken();

        if idle {
            self.observers.record_idle_error();
            tracing::error!(
                connection_id = self.connection_id,
                application_name = self.observers.application_name(),
                error = %error,
                "unexpected error on idle database connection"
            );
        } else {
            tracing::warn!(
                connection_id = self.connection_id,
                application_name = self.observers.application_name(),
                error = %error,
                "database connection failed while leased"
            );
        }

        let event = self.observers.event(self.connection_id, idle);
        self.observers.notify(|h| h.on_error(&event, error));

        // Leased connections are destroyed when they are checked back in.
        if let Some(pool) = self.pool.upgrade() {
            pool.evict_broken(self.connection_id);
        }
    }
}

impl std::fmt::Debug for IdleErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleErrorSink")
            .field("connection_id", &self.connection_id)
            .field("state", &self.flags.state())
            .finish()
    }
}
