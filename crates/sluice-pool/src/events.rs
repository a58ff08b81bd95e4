//! Pool lifecycle observers.
//!
//! A [`PoolEventHandler`] is registered once when the pool is built and is
//! called for every connection lifecycle transition. Handlers only observe:
//! they cannot veto or alter pool behaviour, and a panicking handler is
//! contained so it cannot destabilise the pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Details of a connection lifecycle transition.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionEvent<'a> {
    /// Pool-local connection id.
    pub connection_id: u64,
    /// Application tag of the owning pool.
    pub application_name: &'a str,
    /// Whether the connection was sitting idle in the pool.
    pub idle: bool,
}

/// Receives connection lifecycle notifications.
///
/// All methods default to doing nothing.
pub trait PoolEventHandler: Send + Sync + 'static {
    /// A new physical connection was established.
    fn on_connect(&self, _event: &ConnectionEvent<'_>) {}

    /// A connection was handed out to a caller.
    fn on_acquire(&self, _event: &ConnectionEvent<'_>) {}

    /// A connection was handed back by a caller.
    fn on_release(&self, _event: &ConnectionEvent<'_>) {}

    /// A connection was destroyed and removed from the pool.
    fn on_remove(&self, _event: &ConnectionEvent<'_>) {}

    /// A connection reported an asynchronous error.
    fn on_error(&self, _event: &ConnectionEvent<'_>, _error: &(dyn std::error::Error + 'static)) {}
}

/// Event handler that logs every transition through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl PoolEventHandler for TracingEvents {
    fn on_connect(&self, event: &ConnectionEvent<'_>) {
        tracing::info!(
            connection_id = event.connection_id,
            application_name = event.application_name,
            "database connection established"
        );
    }

    fn on_acquire(&self, event: &ConnectionEvent<'_>) {
        tracing::debug!(
            connection_id = event.connection_id,
            "database connection acquired from pool"
        );
    }

    fn on_release(&self, event: &ConnectionEvent<'_>) {
        tracing::trace!(
            connection_id = event.connection_id,
            "database connection returned to pool"
        );
    }

    fn on_remove(&self, event: &ConnectionEvent<'_>) {
        tracing::debug!(
            connection_id = event.connection_id,
            "database connection removed from pool"
        );
    }
}

/// State shared between a pool and the error sinks of its connections.
pub(crate) struct Observers {
    handler: Arc<dyn PoolEventHandler>,
    application_name: String,
    idle_errors: AtomicU64,
}

impl Observers {
    pub(crate) fn new(handler: Arc<dyn PoolEventHandler>, application_name: String) -> Self {
        Self {
            handler,
            application_name,
            idle_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn application_name(&self) -> &str {
        &self.application_name
    }

    pub(crate) fn idle_errors(&self) -> u64 {
        self.idle_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn record_idle_error(&self) {
        self.idle_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event(&self, connection_id: u64, idle: bool) -> ConnectionEvent<'_> {
        ConnectionEvent {
            connection_id,
            application_name: &self.application_name,
            idle,
        }
    }

    /// Run a handler callback, containing any panic it raises.
    pub(crate) fn notify<F>(&self, callback: F)
    where
        F: FnOnce(&dyn PoolEventHandler),
    {
        let handler = &*self.handler;
        if catch_unwind(AssertUnwindSafe(|| callback(handler))).is_err() {
            tracing::error!(
                application_name = %self.application_name,
                "pool event handler panicked"
            );
        }
    }
}
