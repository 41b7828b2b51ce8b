#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use querygate::{
    config::{CacheConfig, MaintenanceConfig},
    BatchOperation, BatchOptions, EngineConfig, EngineObserver, QueryEngine, QueryError,
    QueryOptions, QueryPlan, Row, SchemaCatalog, SimulatedExecutor, Statement, SuggestionKind,
};
use serde_json::{json, Value};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
    slow: AtomicUsize,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl EngineObserver for RecordingObserver {
    fn query_executed(&self, plan: &QueryPlan, _elapsed: Duration, _priority: querygate::Priority) {
        self.events.lock().push(format!("executed:{}", plan.kind));
    }

    fn cache_hit(&self, _query: &str, _key: querygate::cache::CacheKey) {
        self.events.lock().push("cache_hit".into());
    }

    fn slow_query(&self, _plan: &QueryPlan, _elapsed: Duration) {
        self.slow.fetch_add(1, Ordering::SeqCst);
    }

    fn transaction_started(&self, statements: usize) {
        self.events.lock().push(format!("txn_started:{statements}"));
    }

    fn transaction_completed(&self, statements: usize, _elapsed: Duration) {
        self.events.lock().push(format!("txn_completed:{statements}"));
    }

    fn batch_completed(
        &self,
        operation: BatchOperation,
        table: &str,
        outcome: &querygate::BatchOutcome,
    ) {
        self.events.lock().push(format!(
            "batch:{operation}:{table}:{}",
            outcome.affected_rows
        ));
    }

    fn cache_cleared(&self, pattern: Option<&str>, removed: usize) {
        self.events
            .lock()
            .push(format!("cleared:{}:{removed}", pattern.unwrap_or("*")));
    }
}

fn catalog() -> SchemaCatalog {
    let mut catalog = SchemaCatalog::new();
    catalog.register_table("projects", ["id", "user_id", "name", "created_at"]);
    catalog.register_table("users", ["id", "email"]);
    catalog.register_index("users", ["id"]);
    catalog
}

fn build(
    config: EngineConfig,
    executor: Arc<SimulatedExecutor>,
    observer: Arc<RecordingObserver>,
) -> QueryEngine {
    QueryEngine::builder(config)
        .executor(executor)
        .observer(observer)
        .catalog(catalog())
        .build()
        .expect("engine")
}

fn rows(ids: std::ops::RangeInclusive<i64>) -> Vec<Row> {
    ids.map(|id| match json!({ "id": id, "name": format!("p{id}") }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    })
    .collect()
}

#[tokio::test]
async fn repeated_read_is_served_from_cache() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(2)));
    let observer = Arc::new(RecordingObserver::default());
    let engine = build(EngineConfig::testing(), Arc::clone(&executor), Arc::clone(&observer));
    let query = "SELECT * FROM projects WHERE user_id = ?";

    let first = engine
        .execute(query, &[json!("u1")], QueryOptions::default())
        .await
        .unwrap();
    let plans_after_first = engine.planner().plans_created();
    let slots_after_first = engine.pool_snapshot().created;
    let second = engine
        .execute(query, &[json!("u1")], QueryOptions::default())
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.planner().plans_created(), plans_after_first);
    assert_eq!(engine.pool_snapshot().created, slots_after_first);
    assert_eq!(executor.calls(), 1);
    assert_eq!(
        executor.executed(),
        vec!["SELECT id, user_id, name, created_at FROM projects WHERE user_id = ?"]
    );

    let plan = engine.explain(query, &[json!("u2")]).unwrap();
    assert_eq!(
        plan.applied_optimizations,
        vec!["expanded SELECT * into 4 explicit columns of projects"]
    );
    assert_eq!(plan.suggested_indexes, vec!["idx_projects_user_id"]);
    assert_eq!(observer.events(), vec!["executed:select", "cache_hit"]);

    // A different parameter value misses the cache but reuses the plan.
    engine
        .execute(query, &[json!("u2")], QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(executor.calls(), 2);
    assert_eq!(engine.planner().plans_created(), plans_after_first);
}

#[tokio::test]
async fn expired_entries_are_refetched() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::ZERO));
    let engine = build(
        EngineConfig::testing(),
        Arc::clone(&executor),
        Arc::default(),
    );
    let options = QueryOptions::default().ttl(Duration::from_millis(10));
    engine
        .execute("SELECT name FROM users", &[], options.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    engine
        .execute("SELECT name FROM users", &[], options)
        .await
        .unwrap();
    assert_eq!(executor.calls(), 2);
    assert_eq!(engine.metrics().cache_misses, 2);
}

#[tokio::test]
async fn oversized_results_are_not_cached() {
    let executor = Arc::new(
        SimulatedExecutor::builder()
            .latency(Duration::ZERO)
            .rows_per_select(50)
            .build(),
    );
    let config = EngineConfig {
        cache: CacheConfig {
            max_result_bytes: 64,
            ..CacheConfig::default()
        },
        ..EngineConfig::testing()
    };
    let engine = build(config, Arc::clone(&executor), Arc::default());
    for _ in 0..2 {
        engine
            .execute("SELECT name FROM users", &[], QueryOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(executor.calls(), 2);
    assert_eq!(engine.cache_stats().entries, 0);
}

#[tokio::test]
async fn transaction_and_batch_flow() {
    let executor = Arc::new(
        SimulatedExecutor::builder()
            .latency(Duration::ZERO)
            .fail_when(|query, params| {
                (query.starts_with("INSERT") && params.contains(&json!(7)))
                    .then(|| "duplicate key".to_string())
            })
            .build(),
    );
    let observer = Arc::new(RecordingObserver::default());
    let engine = build(EngineConfig::testing(), Arc::clone(&executor), Arc::clone(&observer));

    let results = engine
        .execute_transaction(&[
            Statement::new("UPDATE projects SET name = ? WHERE id = ?", vec![json!("a"), json!(1)]),
            Statement::new("SELECT name FROM projects WHERE id = ?", vec![json!(1)]),
        ])
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rows_affected, 1);
    assert_eq!(results[1].rows.len(), 3);
    assert_eq!(engine.cache_stats().entries, 0, "transactions bypass the cache");

    let outcome = engine
        .execute_batch(
            BatchOperation::Insert,
            "projects",
            &rows(1..=10),
            BatchOptions { batch_size: Some(3) },
        )
        .await
        .unwrap();
    assert_eq!(outcome.chunks, 4);
    assert_eq!(outcome.affected_rows, 7);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].first_row, 6);
    assert!(outcome.errors[0].message.contains("duplicate key"));

    let events = observer.events();
    assert!(events.contains(&"txn_started:2".to_string()));
    assert!(events.contains(&"txn_completed:2".to_string()));
    assert!(events.contains(&"batch:insert:projects:7".to_string()));

    let metrics = engine.metrics();
    assert_eq!(metrics.transactions, 1);
    assert_eq!(metrics.batches, 1);
    assert_eq!(metrics.errors, 1);
}

#[tokio::test]
async fn batch_update_uses_the_configured_key() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::ZERO));
    let config = EngineConfig {
        batch_key_column: "project_id".into(),
        ..EngineConfig::testing()
    };
    let engine = build(config, Arc::clone(&executor), Arc::default());
    let rows: Vec<Row> = (1..=2)
        .map(|id| match json!({ "project_id": id, "name": "x" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect();
    let outcome = engine
        .execute_batch(BatchOperation::Update, "projects", &rows, BatchOptions::default())
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.affected_rows, 2);
    assert_eq!(
        executor.executed(),
        vec![
            "UPDATE projects SET name = CASE project_id WHEN ? THEN ? WHEN ? THEN ? ELSE name END \
             WHERE project_id IN (?, ?)"
        ]
    );
}

#[tokio::test]
async fn slow_history_stays_bounded() {
    let executor = Arc::new(SimulatedExecutor::new(Duration::from_millis(3)));
    let observer = Arc::new(RecordingObserver::default());
    let config = EngineConfig {
        slow_query_threshold_ms: 1,
        slow_query_history: 5,
        ..EngineConfig::testing()
    };
    let engine = build(config, executor, Arc::clone(&observer));
    for n in 0..12 {
        engine
            .execute(&format!("SELECT {n}"), &[], QueryOptions::uncached())
            .await
            .unwrap();
    }
    let slow = engine.slow_queries();
    assert_eq!(slow.len(), 5);
    assert_eq!(slow[0].plan.original_query, "SELECT 7");
    assert_eq!(engine.metrics().slow_queries, 12);
    assert_eq!(observer.slow.load(Ordering::SeqCst), 12);

    let report = engine.analyze().unwrap();
    assert_eq!(report.suggestions[0].kind, SuggestionKind::Query);
    assert_eq!(report.slow_queries.len(), 5);
}

#[tokio::test]
async fn clear_cache_by_pattern() {
    let observer = Arc::new(RecordingObserver::default());
    let engine = build(
        EngineConfig::testing(),
        Arc::new(SimulatedExecutor::new(Duration::ZERO)),
        Arc::clone(&observer),
    );
    engine
        .execute("SELECT name FROM projects", &[], QueryOptions::default())
        .await
        .unwrap();
    engine
        .execute("SELECT email FROM users", &[], QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(engine.clear_cache(Some("users")).unwrap(), 1);
    assert_eq!(engine.clear_cache(None).unwrap(), 1);
    let events = observer.events();
    assert!(events.contains(&"cleared:users:1".to_string()));
    assert!(events.contains(&"cleared:*:1".to_string()));
}

#[tokio::test]
async fn background_maintenance_purges_expired_entries() {
    let config = EngineConfig {
        maintenance: MaintenanceConfig {
            enabled: true,
            interval_ms: 20,
        },
        ..EngineConfig::testing()
    };
    let engine = build(
        config,
        Arc::new(SimulatedExecutor::new(Duration::ZERO)),
        Arc::default(),
    );
    engine
        .execute(
            "SELECT name FROM projects",
            &[],
            QueryOptions::default().ttl(Duration::from_millis(5)),
        )
        .await
        .unwrap();
    assert_eq!(engine.cache_stats().entries, 1);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(engine.cache_stats().entries, 0);

    engine.cleanup().await;
    assert!(matches!(
        engine.analyze(),
        Err(QueryError::EngineClosed)
    ));
}
