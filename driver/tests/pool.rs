mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use assert_matches::assert_matches;
use common::FakeDynamo;
use dynosql_driver::Connection;
use dynosql_driver::ConnectionConfig;
use dynosql_driver::ConnectionFactory;
use dynosql_driver::ConnectionPool;
use dynosql_driver::DriverError;
use dynosql_driver::PoolConfig;
use futures::FutureExt;
use pretty_assertions::assert_eq;

fn factory_over(fake: Arc<FakeDynamo>) -> ConnectionFactory {
    Arc::new(move || {
        let fake = fake.clone();
        async move {
            let mut props: HashMap<String, String> = HashMap::new();
            props.insert("schemaCache".to_string(), "false".to_string());
            props.insert("retryMaxAttempts".to_string(), "0".to_string());
            Ok(Connection::with_transport(
                ConnectionConfig::from_properties(&props),
                fake,
            ))
        }
        .boxed()
    })
}

fn small_pool_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        max_size,
        connection_timeout: Duration::from_millis(50),
        test_on_borrow: false,
        test_while_idle: false,
        ..PoolConfig::default()
    }
}

#[tokio::test]
async fn borrow_reuses_returned_connections() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let pool = ConnectionPool::with_factory(small_pool_config(2), factory_over(fake))
        .await
        .unwrap();

    let first = pool.borrow().await.unwrap();
    let first_id = first.id();
    pool.give_back(first).await;

    let second = pool.borrow().await.unwrap();
    assert_eq!(second.id(), first_id, "idle connection is reused");
    assert_eq!(pool.status().created, 1);
    pool.give_back(second).await;
    pool.close().await;
}

#[tokio::test]
async fn counts_satisfy_the_pool_invariant() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let pool = ConnectionPool::with_factory(small_pool_config(3), factory_over(fake))
        .await
        .unwrap();

    let a = pool.borrow().await.unwrap();
    let b = pool.borrow().await.unwrap();
    pool.give_back(a).await;

    let status = pool.status();
    assert_eq!(status.active, 1);
    assert_eq!(status.idle, 1);
    assert_eq!(status.idle + status.active, status.total);
    assert!(status.total <= status.max_size);

    pool.give_back(b).await;
    pool.close().await;
}

#[tokio::test]
async fn exhausted_pool_blocks_then_reports_counts() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let pool = ConnectionPool::with_factory(small_pool_config(2), factory_over(fake))
        .await
        .unwrap();

    let _a = pool.borrow().await.unwrap();
    let _b = pool.borrow().await.unwrap();

    let started = Instant::now();
    let error = pool.borrow().await.unwrap_err();
    assert!(
        started.elapsed() >= Duration::from_millis(50),
        "borrow blocked for the configured wait"
    );
    assert_matches!(
        error,
        DriverError::PoolExhausted {
            active: 2,
            total: 2
        }
    );
    assert_eq!(pool.status().wait_timeouts, 1);
}

#[tokio::test]
async fn non_blocking_pool_fails_fast_when_exhausted() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let config = PoolConfig {
        block_when_exhausted: false,
        ..small_pool_config(1)
    };
    let pool = ConnectionPool::with_factory(config, factory_over(fake))
        .await
        .unwrap();

    let _held = pool.borrow().await.unwrap();
    let started = Instant::now();
    let error = pool.borrow().await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_matches!(error, DriverError::PoolExhausted { .. });
}

#[tokio::test]
async fn broken_connections_are_destroyed_on_return() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let pool = ConnectionPool::with_factory(small_pool_config(2), factory_over(fake))
        .await
        .unwrap();

    let mut conn = pool.borrow().await.unwrap();
    conn.mark_broken();
    pool.give_back(conn).await;

    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.destroyed, 1);
}

#[tokio::test]
async fn failed_validation_keeps_connections_out_of_the_pool() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let config = PoolConfig {
        test_on_borrow: true,
        ..small_pool_config(2)
    };
    let pool = ConnectionPool::with_factory(config, factory_over(fake.clone()))
        .await
        .unwrap();

    let first = pool.borrow().await.unwrap();
    let first_id = first.id();
    pool.give_back(first).await;

    // The idle connection now fails its borrow-time probe; the pool must
    // discard it and hand out a fresh one.
    fake.set_healthy(false);
    let second = pool.borrow().await.unwrap();
    assert_ne!(second.id(), first_id);
    assert_eq!(pool.status().destroyed, 1);
}

#[tokio::test]
async fn initial_size_warms_the_pool() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let config = PoolConfig {
        initial_size: 2,
        ..small_pool_config(4)
    };
    let pool = ConnectionPool::with_factory(config, factory_over(fake))
        .await
        .unwrap();
    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(status.total, 2);
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn min_size_is_enforced_by_the_maintenance_task() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let config = PoolConfig {
        min_size: 2,
        ..small_pool_config(4)
    };
    let pool = ConnectionPool::with_factory(config, factory_over(fake))
        .await
        .unwrap();
    assert_eq!(pool.status().total, 0, "nothing created eagerly");

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(pool.status().total, 2, "min-size task filled the pool");
    pool.close().await;
}

#[tokio::test(start_paused = true)]
async fn eviction_destroys_idle_timed_out_connections() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let config = PoolConfig {
        idle_timeout: Duration::from_secs(5),
        time_between_eviction_runs: Duration::from_secs(10),
        ..small_pool_config(2)
    };
    let pool = ConnectionPool::with_factory(config, factory_over(fake))
        .await
        .unwrap();

    let conn = pool.borrow().await.unwrap();
    pool.give_back(conn).await;
    assert_eq!(pool.status().idle, 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(pool.status().idle, 0, "idle connection evicted");
    assert_eq!(pool.status().destroyed, 1);
    pool.close().await;
}

#[tokio::test]
async fn closed_pool_rejects_borrows_and_drains_idle() {
    let fake = Arc::new(FakeDynamo::new().with_numbered_table("t", 1));
    let pool = ConnectionPool::with_factory(small_pool_config(2), factory_over(fake))
        .await
        .unwrap();

    let held = pool.borrow().await.unwrap();
    let idle = pool.borrow().await.unwrap();
    pool.give_back(idle).await;

    pool.close().await;
    assert_matches!(pool.borrow().await.unwrap_err(), DriverError::PoolClosed);

    // A late return of a borrowed connection is destroyed, not pooled.
    pool.give_back(held).await;
    let status = pool.status();
    assert_eq!(status.total, 0);
    assert_eq!(status.idle, 0);
}
