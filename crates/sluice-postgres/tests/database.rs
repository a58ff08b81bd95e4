//! Process-wide database state against the in-memory manager.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use sluice_config::{ConnectionInputs, Environment, PoolConfiguration};
use sluice_pool::{MonitorConfig, Pool, PoolError, PoolState, create_read_replica_pool};
use sluice_postgres::Database;
use sluice_testing::MockManager;
use tokio_test::assert_ok;

const REPLICA_URL: &str = "postgresql://reader@replica.internal/app";

fn config() -> PoolConfiguration {
    PoolConfiguration::resolve_for(Environment::Test, &ConnectionInputs::default())
}

fn database(with_replica: bool) -> Database<MockManager> {
    let base = config();
    let primary = Pool::new(MockManager::new(), base.clone()).unwrap();
    let url = with_replica.then_some(REPLICA_URL);
    let replica = create_read_replica_pool(&base, url, |_: &PoolConfiguration| {
        Ok(MockManager::new())
    })
    .unwrap();
    Database::new(primary, replica)
}

#[tokio::test]
async fn test_reader_falls_back_to_primary() {
    let db = database(false);
    assert!(db.replica().is_none());
    assert_eq!(
        db.reader().config().application_name,
        "social-media-platform-test"
    );
}

#[tokio::test]
async fn test_reader_uses_replica() {
    let db = database(true);
    assert_eq!(
        db.reader().config().application_name,
        "social-media-platform-test-read-replica"
    );
}

#[tokio::test]
async fn test_shutdown_closes_both_pools() {
    let mut db = database(true);
    db.start_monitoring(MonitorConfig::default().interval(Duration::from_secs(1)));
    assert!(db.check_health().await.healthy);

    let primary = db.primary().clone();
    let replica = db.replica().unwrap().clone();

    assert_ok!(db.shutdown().await);
    assert_eq!(primary.state(), PoolState::Closed);
    assert_eq!(replica.state(), PoolState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_outstanding_connections() {
    let base = config().shutdown_timeout(Duration::from_millis(500));
    let primary = Pool::new(MockManager::new(), base).unwrap();
    let db = Database::new(primary, None);

    let leaked = db.primary().get().await.unwrap();
    let err = db.shutdown().await.err().unwrap();
    assert!(matches!(err, PoolError::Shutdown { outstanding: 1 }));
    drop(leaked);
}

#[tokio::test(start_paused = true)]
async fn test_restart_monitoring_replaces_monitors() {
    let mut db = database(true);
    db.start_monitoring(MonitorConfig::default());
    db.start_monitoring(MonitorConfig::default().interval(Duration::from_secs(5)));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_ok!(db.shutdown().await);
}
