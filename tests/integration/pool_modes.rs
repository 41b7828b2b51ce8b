#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use querygate::{
    EngineConfig, PoolMode, QueryEngine, QueryError, QueryOptions, SimulatedExecutor,
};

const CEILING: usize = 3;

fn engine(pool: PoolMode, latency: Duration) -> (QueryEngine, Arc<SimulatedExecutor>) {
    let executor = Arc::new(SimulatedExecutor::new(latency));
    let config = EngineConfig {
        max_concurrent_queries: CEILING,
        pool,
        ..EngineConfig::testing()
    };
    let engine = QueryEngine::new(config, executor.clone()).expect("engine");
    (engine, executor)
}

async fn burst(engine: &QueryEngine, callers: usize) -> Vec<Result<(), QueryError>> {
    let handles: Vec<_> = (0..callers)
        .map(|n| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .execute(&format!("SELECT {n}"), &[], QueryOptions::uncached())
                    .await
                    .map(|_| ())
            })
        })
        .collect();
    let mut results = Vec::with_capacity(callers);
    for handle in handles {
        results.push(handle.await.expect("task"));
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ceiling_plus_one_is_rejected() {
    let (engine, executor) = engine(PoolMode::FailFast, Duration::from_millis(100));
    let results = burst(&engine, CEILING + 1).await;

    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_rejection()))
        .count();
    assert!(rejected >= 1, "expected a rejection, got {results:?}");
    assert!(executor.peak_concurrency() <= CEILING);
    assert!(engine.pool_snapshot().created <= CEILING);
    assert_eq!(engine.metrics().in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_never_exceeds_ceiling_under_load() {
    let (engine, executor) = engine(PoolMode::FailFast, Duration::from_millis(5));
    for _ in 0..5 {
        burst(&engine, CEILING * 4).await;
    }
    assert!(executor.peak_concurrency() <= CEILING);
    let snapshot = engine.pool_snapshot();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.idle, snapshot.created);
}

fn single_slot_engine(
    max_waiters: usize,
    wait_timeout_ms: u64,
    latency: Duration,
) -> (QueryEngine, Arc<SimulatedExecutor>) {
    let executor = Arc::new(SimulatedExecutor::new(latency));
    let config = EngineConfig {
        max_concurrent_queries: 1,
        pool: PoolMode::BoundedWait {
            max_waiters,
            wait_timeout_ms,
        },
        ..EngineConfig::testing()
    };
    let engine = QueryEngine::new(config, executor.clone()).expect("engine");
    (engine, executor)
}

#[tokio::test]
async fn bounded_wait_parks_a_caller_until_the_slot_frees() {
    let (engine, executor) = single_slot_engine(1, 2_000, Duration::from_millis(50));
    let results = burst(&engine, 3).await;

    assert!(results[0].is_ok(), "{results:?}");
    assert!(results[1].is_ok(), "parked caller should succeed: {results:?}");
    assert!(matches!(
        results[2],
        Err(QueryError::TooManyConcurrentQueries { in_flight: 2, max: 2 })
    ));
    assert_eq!(executor.calls(), 2);
    assert_eq!(executor.peak_concurrency(), 1);

    let snapshot = engine.pool_snapshot();
    assert_eq!(snapshot.created, 1);
    assert_eq!(snapshot.waiters, 0);
    assert_eq!(snapshot.rejections, 0);
}

#[tokio::test]
async fn bounded_wait_gives_up_after_the_wait_timeout() {
    let (engine, executor) = single_slot_engine(4, 20, Duration::from_millis(200));
    let results = burst(&engine, 2).await;

    assert!(results[0].is_ok(), "{results:?}");
    assert!(matches!(
        results[1],
        Err(QueryError::PoolExhausted { max: 1 })
    ));
    assert_eq!(executor.calls(), 1);
    assert_eq!(engine.pool_snapshot().rejections, 1);

    let metrics = engine.metrics();
    assert_eq!(metrics.rejections, 1);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test]
async fn timeouts_release_their_slots() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(500)));
    let config = EngineConfig {
        max_concurrent_queries: 1,
        query_timeout_ms: 10,
        ..EngineConfig::testing()
    };
    let engine = QueryEngine::new(config, executor).expect("engine");
    for _ in 0..3 {
        let err = engine
            .execute("SELECT 1", &[], QueryOptions::uncached())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout { timeout_ms: 10 }));
    }
    let snapshot = engine.pool_snapshot();
    assert_eq!(snapshot.created, 1);
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(engine.metrics().errors, 3);
}
