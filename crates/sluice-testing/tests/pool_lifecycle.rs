//! Pool lifecycle tests against the in-memory connection manager.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sluice_config::{ConnectionInputs, Environment, PoolConfiguration};
use sluice_pool::{ConnectionEvent, Pool, PoolError, PoolEventHandler, PoolState};
use sluice_testing::{Fault, MockManager, Step};
use tokio_test::{assert_err, assert_ok};

fn test_config() -> PoolConfiguration {
    PoolConfiguration::resolve_for(Environment::Test, &ConnectionInputs::default())
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    removes: AtomicUsize,
}

impl PoolEventHandler for Recorder {
    fn on_connect(&self, _event: &ConnectionEvent<'_>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_acquire(&self, _event: &ConnectionEvent<'_>) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn on_release(&self, _event: &ConnectionEvent<'_>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn on_remove(&self, _event: &ConnectionEvent<'_>) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Creation and checkout
// =============================================================================

#[tokio::test]
async fn test_pool_is_lazy() {
    let manager = MockManager::new();
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    assert_eq!(manager.connects(), 0);
    assert_eq!(pool.state(), PoolState::Open);
    assert_eq!(pool.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = test_config().min_connections(10);
    let err = Pool::new(MockManager::new(), config).err().unwrap();
    assert!(matches!(err, PoolError::Config(_)));
}

#[tokio::test]
async fn test_session_settings_applied_on_connect() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let conn = pool.get().await.unwrap();

    assert_eq!(
        conn.statements,
        vec![
            "SET statement_timeout = 10000".to_string(),
            "SET lock_timeout = 10000".to_string(),
            "SET idle_in_transaction_session_timeout = 60000".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_session_settings_failure_is_not_fatal() {
    let manager = MockManager::new();
    manager.fail(Step::SessionSettings, Fault::Error);
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let conn = assert_ok!(pool.get().await);
    assert!(conn.statements.is_empty());
    assert_eq!(pool.counters().session_setup_failures, 1);
}

#[tokio::test]
async fn test_connection_is_reused() {
    let manager = MockManager::new();
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let first = pool.get().await.unwrap();
    let id = first.id;
    drop(first);

    let metrics = pool.metrics();
    assert_eq!(metrics.total_connections, 1);
    assert_eq!(metrics.idle_connections, 1);
    assert_eq!(metrics.active_connections, 0);

    let second = pool.get().await.unwrap();
    assert_eq!(second.id, id);
    assert_eq!(second.metadata().checkout_count, 2);
    assert_eq!(manager.connects(), 1);
}

#[tokio::test]
async fn test_active_connections_counted() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.total_connections, 2);
    assert_eq!(metrics.active_connections, 2);
    assert!((metrics.utilization_percent - 40.0).abs() < f64::EPSILON);
    drop((a, b));
}

#[tokio::test]
async fn test_event_handler_sees_lifecycle() {
    let recorder = Arc::new(Recorder::default());
    let pool = Pool::builder()
        .config(test_config())
        .shared_event_handler(recorder.clone())
        .build(MockManager::new())
        .unwrap();

    let conn = pool.get().await.unwrap();
    drop(conn);
    let conn = pool.get().await.unwrap();
    conn.mark_broken();
    drop(conn);

    assert_eq!(recorder.connects.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.acquires.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.releases.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.removes.load(Ordering::SeqCst), 1);
    assert_eq!(pool.metrics().total_connections, 0);
}

// =============================================================================
// Capacity and timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_when_exhausted() {
    let config = test_config().max_connections(1);
    let pool = Pool::new(MockManager::new(), config).unwrap();
    let _held = pool.get().await.unwrap();

    let err = assert_err!(pool.get().await);
    assert!(matches!(
        err,
        PoolError::ConnectionTimeout { timeout } if timeout == Duration::from_millis(3000)
    ));
    assert!(err.is_retryable());
    assert_eq!(pool.counters().checkouts_failed, 1);
    assert_eq!(pool.metrics().waiting_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_requests_are_counted() {
    let config = test_config().max_connections(1);
    let pool = Pool::new(MockManager::new(), config).unwrap();
    let held = pool.get().await.unwrap();

    let handle = pool.handle();
    let waiter = tokio::spawn(async move { handle.get().await.map(|c| c.id) });
    settle().await;
    assert_eq!(pool.metrics().waiting_requests, 1);

    let id = held.id;
    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), id);
    assert_eq!(pool.metrics().waiting_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_releases_slot() {
    let manager = MockManager::new();
    manager.set_connect_delay(Duration::from_secs(10));
    let pool = Pool::new(manager, test_config()).unwrap();

    let err = pool.get().await.err().unwrap();
    assert!(matches!(err, PoolError::ConnectionTimeout { .. }));
    assert_eq!(pool.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_connect_failure_releases_slot() {
    let manager = MockManager::new();
    manager.fail(Step::Connect, Fault::Error);
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let err = pool.get().await.err().unwrap();
    assert!(matches!(err, PoolError::Connect(_)));
    assert_eq!(pool.metrics().total_connections, 0);

    manager.clear(Step::Connect);
    assert_ok!(pool.get().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_exceeds_max_connections() {
    let manager = MockManager::new();
    let config = test_config().max_connections(3);
    let pool = Pool::new(manager.clone(), config).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let handle = pool.handle();
        tasks.push(tokio::spawn(async move {
            let conn = handle.get().await?;
            let metrics = handle.metrics();
            tokio::time::sleep(Duration::from_millis(2)).await;
            drop(conn);
            Ok::<_, PoolError>(metrics)
        }));
    }

    for task in tasks {
        let metrics = task.await.unwrap().unwrap();
        assert!(!metrics.is_over_capacity(), "{metrics:?}");
        assert!(metrics.utilization_percent <= 100.0);
    }
    assert!(manager.connects() <= 3);
    assert!(pool.metrics().total_connections <= 3);
}

// =============================================================================
// Release, detach and broken connections
// =============================================================================

#[tokio::test]
async fn test_release_runs_reset() {
    let manager = MockManager::new();
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let conn = pool.get().await.unwrap();
    assert_ok!(conn.release().await);
    assert_eq!(manager.resets(), 1);
    assert_eq!(pool.metrics().idle_connections, 1);
}

#[tokio::test]
async fn test_failed_reset_destroys_connection() {
    let manager = MockManager::new();
    manager.fail(Step::Reset, Fault::Error);
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let conn = pool.get().await.unwrap();
    let err = conn.release().await.err().unwrap();
    assert!(matches!(err, PoolError::Reset(_)));
    assert_eq!(pool.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_detach_frees_slot() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let conn = pool.get().await.unwrap();

    let raw = conn.detach().unwrap();
    assert_eq!(raw.id, 1);
    assert_eq!(pool.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_closed_connection_is_replaced() {
    let manager = MockManager::new();
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let conn = pool.get().await.unwrap();
    let id = conn.id;
    drop(conn);

    // Server closes the idle connection.
    assert!(manager.fail_connection(id, "terminating connection due to administrator command"));

    let conn = pool.get().await.unwrap();
    assert_ne!(conn.id, id);
    assert_eq!(manager.connects(), 2);
    assert_eq!(pool.metrics().total_connections, 1);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_close_idle_pool() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    drop(pool.get().await.unwrap());
    let handle = pool.handle();

    assert_ok!(pool.close().await);
    assert_eq!(handle.state(), PoolState::Closed);
    assert_eq!(handle.metrics().total_connections, 0);
    assert!(matches!(handle.get().await, Err(PoolError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_close_waits_for_leased_connections() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let handle = pool.handle();
    let conn = pool.get().await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(conn);
    });

    assert_ok!(pool.close().await);
    assert_eq!(handle.state(), PoolState::Closed);
    assert_eq!(handle.metrics().total_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_new_checkouts_while_draining() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let handle = pool.handle();
    let conn = pool.get().await.unwrap();

    let closing = tokio::spawn(pool.close());
    settle().await;

    assert_eq!(handle.state(), PoolState::Closing);
    assert!(matches!(handle.get().await, Err(PoolError::Closed)));

    drop(conn);
    assert_ok!(closing.await.unwrap());
    assert_eq!(handle.state(), PoolState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_checkout_racing_close_is_rejected() {
    let manager = MockManager::new();
    manager.set_connect_delay(Duration::from_millis(200));
    let pool = Pool::new(manager.clone(), test_config()).unwrap();
    let handle = pool.handle();

    let getter = {
        let handle = pool.handle();
        tokio::spawn(async move { handle.get().await.map(|conn| conn.id) })
    };
    settle().await;
    tokio::time::advance(Duration::from_millis(50)).await;

    let closing = tokio::spawn(pool.close());
    settle().await;
    assert_eq!(handle.state(), PoolState::Closing);

    tokio::time::advance(Duration::from_millis(200)).await;
    settle().await;

    // Connected after close began: destroyed instead of leased.
    assert!(matches!(getter.await.unwrap(), Err(PoolError::Closed)));
    assert_ok!(closing.await.unwrap());
    assert_eq!(manager.connects(), 1);
    assert_eq!(handle.metrics().total_connections, 0);
    assert_eq!(handle.counters().connections_closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_times_out_with_outstanding_connections() {
    let config = test_config().shutdown_timeout(Duration::from_secs(1));
    let pool = Pool::new(MockManager::new(), config).unwrap();
    let handle = pool.handle();
    let conn = pool.get().await.unwrap();

    let err = pool.close().await.err().unwrap();
    assert!(matches!(err, PoolError::Shutdown { outstanding: 1 }));
    assert_eq!(handle.state(), PoolState::Closed);

    // Returned late: destroyed rather than pooled.
    drop(conn);
    assert_eq!(handle.metrics().total_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_queued_callers() {
    let config = test_config().max_connections(1);
    let pool = Pool::new(MockManager::new(), config).unwrap();
    let held = pool.get().await.unwrap();

    let handle = pool.handle();
    let waiter = tokio::spawn(async move { handle.get().await.map(|_| ()) });
    settle().await;

    let closing = tokio::spawn(pool.close());
    settle().await;
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));

    drop(held);
    assert_ok!(closing.await.unwrap());
}

#[tokio::test]
async fn test_dropping_pool_closes_it() {
    let pool = Pool::new(MockManager::new(), test_config()).unwrap();
    let handle = pool.handle();
    drop(pool.get().await.unwrap());

    drop(pool);
    assert!(handle.is_closed());
    assert_eq!(handle.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_counters() {
    let manager = MockManager::new();
    manager.fail(Step::Connect, Fault::Error);
    let pool = Pool::new(manager.clone(), test_config()).unwrap();
    assert_err!(pool.get().await);

    manager.clear(Step::Connect);
    let conn = pool.get().await.unwrap();
    conn.mark_broken();
    drop(conn);

    let counters = pool.counters();
    assert_eq!(counters.connections_created, 1);
    assert_eq!(counters.connections_closed, 1);
    assert_eq!(counters.checkouts_successful, 1);
    assert_eq!(counters.checkouts_failed, 1);
    assert!((counters.checkout_success_rate() - 0.5).abs() < f64::EPSILON);
}
