//! In-memory connection manager with failure injection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_config::SessionSettings;
use sluice_pool::{ConnectionManager, IdleErrorSink};

/// A lifecycle step of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Opening a connection.
    Connect,
    /// Applying session settings to a new connection.
    SessionSettings,
    /// The `SELECT 1` probe.
    Ping,
    /// The reset hook run on explicit release.
    Reset,
}

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return a [`MockError`].
    Error,
    /// Never complete.
    Hang,
    /// Panic inside the manager.
    Panic,
}

/// Error returned by [`MockManager`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mock {step:?} failure: {message}")]
pub struct MockError {
    /// Step that failed.
    pub step: Step,
    /// Failure description.
    pub message: String,
}

impl MockError {
    /// Create an error for `step`.
    pub fn new(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

/// A fake physical connection.
#[derive(Debug)]
pub struct MockConnection {
    /// Pool-local id assigned when the connection was opened.
    pub id: u64,
    /// Session statements applied to this connection.
    pub statements: Vec<String>,
    closed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Whether the fake server side closed this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct MockState {
    faults: Mutex<HashMap<Step, Fault>>,
    connect_delay: Mutex<Duration>,
    connects: AtomicUsize,
    session_setups: AtomicUsize,
    pings: AtomicUsize,
    resets: AtomicUsize,
    /// Error sinks and server-side close flags of every opened connection.
    opened: Mutex<Vec<(IdleErrorSink, Arc<AtomicBool>)>>,
}

/// In-memory [`ConnectionManager`].
///
/// Clones share state, so a test can keep one clone for assertions and hand
/// another to the pool.
#[derive(Clone, Default)]
pub struct MockManager {
    state: Arc<MockState>,
}

impl MockManager {
    /// Create a manager where every step succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `step` fail with `fault` until cleared.
    pub fn fail(&self, step: Step, fault: Fault) {
        self.state.faults.lock().insert(step, fault);
    }

    /// Make `step` succeed again.
    pub fn clear(&self, step: Step) {
        self.state.faults.lock().remove(&step);
    }

    /// Delay every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::Acquire)
    }

    /// Session setups attempted so far.
    #[must_use]
    pub fn session_setups(&self) -> usize {
        self.state.session_setups.load(Ordering::Acquire)
    }

    /// Pings attempted so far.
    #[must_use]
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::Acquire)
    }

    /// Resets attempted so far.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::Acquire)
    }

    /// Close connection `id` on the fake server side without reporting it,
    /// like a driver that only notices on next use.
    pub fn close_silently(&self, id: u64) -> bool {
        let opened = self.state.opened.lock();
        let Some((_, closed)) = opened.iter().find(|(sink, _)| sink.connection_id() == id) else {
            return false;
        };
        closed.store(true, Ordering::Release);
        true
    }

    /// Simulate the server dropping connection `id` in the background.
    ///
    /// The connection is closed and the failure is reported through the
    /// pool's error sink, exactly as a real client driver would. Returns
    /// `false` if no such connection was opened.
    pub fn fail_connection(&self, id: u64, message: &str) -> bool {
        let opened = self.state.opened.lock();
        let Some((sink, closed)) = opened.iter().find(|(sink, _)| sink.connection_id() == id)
        else {
            return false;
        };
        closed.store(true, Ordering::Release);
        sink.report(&MockError::new(Step::Connect, message));
        true
    }

    #[allow(clippy::panic)]
    async fn trip(&self, step: Step) -> Result<(), MockError> {
        let fault = self.state.faults.lock().get(&step).copied();
        match fault {
            None => Ok(()),
            Some(Fault::Error) => Err(MockError::new(step, "injected")),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Panic) => panic!("injected panic at {step:?}"),
        }
    }
}

#[async_trait]
impl ConnectionManager for MockManager {
    type Connection = MockConnection;
    type Error = MockError;

    async fn connect(&self, errors: IdleErrorSink) -> Result<MockConnection, MockError> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.trip(Step::Connect).await?;

        self.state.connects.fetch_add(1, Ordering::AcqRel);
        let id = errors.connection_id();
        let closed = Arc::new(AtomicBool::new(false));
        self.state.opened.lock().push((errors, Arc::clone(&closed)));

        tracing::trace!(connection_id = id, "mock connection opened");
        Ok(MockConnection {
            id,
            statements: Vec::new(),
            closed,
        })
    }

    async fn apply_session_settings(
        &self,
        conn: &mut MockConnection,
        settings: &SessionSettings,
    ) -> Result<(), MockError> {
        self.state.session_setups.fetch_add(1, Ordering::AcqRel);
        self.trip(Step::SessionSettings).await?;
        conn.statements.extend(settings.statements());
        Ok(())
    }

    async fn ping(&self, conn: &mut MockConnection) -> Result<(), MockError> {
        self.state.pings.fetch_add(1, Ordering::AcqRel);
        self.trip(Step::Ping).await?;
        if conn.is_closed() {
            return Err(MockError::new(Step::Ping, "connection closed"));
        }
        Ok(())
    }

    async fn reset(&self, _conn: &mut MockConnection) -> Result<(), MockError> {
        self.state.resets.fetch_add(1, Ordering::AcqRel);
        self.trip(Step::Reset).await
    }

    fn is_broken(&self, conn: &MockConnection) -> bool {
        conn.is_closed()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_fault_injection() {
        let manager = MockManager::new();
        assert!(manager.trip(Step::Ping).await.is_ok());

        manager.fail(Step::Ping, Fault::Error);
        let err = manager.trip(Step::Ping).await.unwrap_err();
        assert_eq!(err.step, Step::Ping);
        assert_eq!(err.to_string(), "mock Ping failure: injected");

        manager.clear(Step::Ping);
        assert!(manager.trip(Step::Ping).await.is_ok());
    }

    #[test]
    fn test_unknown_connection() {
        assert!(!MockManager::new().fail_connection(42, "gone"));
    }
}
