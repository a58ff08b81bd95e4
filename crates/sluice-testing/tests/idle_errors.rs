//! Errors raised by idle connections must be contained by the pool.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sluice_config::{ConnectionInputs, Environment, PoolConfiguration};
use sluice_pool::{ConnectionEvent, Pool, PoolEventHandler};
use sluice_testing::MockManager;

fn test_config() -> PoolConfiguration {
    PoolConfiguration::resolve_for(Environment::Test, &ConnectionInputs::default())
}

#[derive(Default)]
struct ErrorRecorder {
    idle: AtomicUsize,
    leased: AtomicUsize,
    removed_idle: AtomicUsize,
}

impl PoolEventHandler for ErrorRecorder {
    fn on_remove(&self, event: &ConnectionEvent<'_>) {
        if event.idle {
            self.removed_idle.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_error(&self, event: &ConnectionEvent<'_>, _error: &(dyn std::error::Error + 'static)) {
        if event.idle {
            self.idle.fetch_add(1, Ordering::SeqCst);
        } else {
            self.leased.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct PanickingHandler;

impl PoolEventHandler for PanickingHandler {
    fn on_error(&self, _event: &ConnectionEvent<'_>, _error: &(dyn std::error::Error + 'static)) {
        panic!("observer bug");
    }
}

#[tokio::test]
async fn test_idle_error_is_contained() {
    let manager = MockManager::new();
    let recorder = Arc::new(ErrorRecorder::default());
    let pool = Pool::builder()
        .config(test_config())
        .shared_event_handler(recorder.clone())
        .build(manager.clone())
        .unwrap();

    let conn = pool.get().await.unwrap();
    let id = conn.id;
    drop(conn);

    assert!(manager.fail_connection(id, "server closed the connection unexpectedly"));

    assert_eq!(recorder.idle.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.leased.load(Ordering::SeqCst), 0);
    assert_eq!(pool.counters().idle_errors, 1);

    // The pool keeps working and replaces the dead connection.
    let conn = pool.get().await.unwrap();
    assert_ne!(conn.id, id);
    assert!(pool.check_health().await.healthy);
}

#[tokio::test]
async fn test_idle_error_removes_connection_at_once() {
    let manager = MockManager::new();
    let recorder = Arc::new(ErrorRecorder::default());
    let pool = Pool::builder()
        .config(test_config().min_connections(1))
        .shared_event_handler(recorder.clone())
        .build(manager.clone())
        .unwrap();

    let id = pool.get().await.unwrap().id;
    assert_eq!(pool.metrics().idle_connections, 1);

    assert!(manager.fail_connection(id, "terminating connection due to administrator command"));

    // Gone before any checkout or reaper pass.
    let metrics = pool.metrics();
    assert_eq!(metrics.total_connections, 0);
    assert_eq!(metrics.idle_connections, 0);
    assert_eq!(recorder.removed_idle.load(Ordering::SeqCst), 1);
    assert_eq!(pool.counters().connections_closed, 1);
    assert_eq!(manager.connects(), 1);
}

#[tokio::test]
async fn test_leased_error_is_not_counted_as_idle() {
    let manager = MockManager::new();
    let recorder = Arc::new(ErrorRecorder::default());
    let pool = Pool::builder()
        .config(test_config())
        .shared_event_handler(recorder.clone())
        .build(manager.clone())
        .unwrap();

    let conn = pool.get().await.unwrap();
    assert!(manager.fail_connection(conn.id, "connection reset by peer"));
    drop(conn);

    assert_eq!(recorder.leased.load(Ordering::SeqCst), 1);
    assert_eq!(pool.counters().idle_errors, 0);
    // Broken connections are destroyed on return.
    assert_eq!(pool.metrics().total_connections, 0);
}

#[tokio::test]
async fn test_panicking_observer_does_not_escape() {
    let manager = MockManager::new();
    let pool = Pool::builder()
        .config(test_config())
        .event_handler(PanickingHandler)
        .build(manager.clone())
        .unwrap();

    let conn = pool.get().await.unwrap();
    let id = conn.id;
    drop(conn);

    let reported = panic::catch_unwind(AssertUnwindSafe(|| {
        manager.fail_connection(id, "server restart")
    }));
    assert!(matches!(reported, Ok(true)));
    assert_eq!(pool.counters().idle_errors, 1);
    assert!(pool.get().await.is_ok());
}

#[tokio::test]
async fn test_many_idle_errors() {
    let manager = MockManager::new();
    let pool = Pool::new(manager.clone(), test_config()).unwrap();

    let conns: Vec<_> = {
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.get().await.unwrap());
        }
        held
    };
    let ids: Vec<u64> = conns.iter().map(|c| c.id).collect();
    drop(conns);

    for id in &ids {
        assert!(manager.fail_connection(*id, "server restart"));
    }
    assert_eq!(pool.counters().idle_errors, 5);

    let health = pool.check_health().await;
    assert!(health.healthy);
    assert_eq!(health.total_count, 1);
}
