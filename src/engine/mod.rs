//! Execution coordinator.
//!
//! [`QueryEngine`] sequences the leaf subsystems for every request:
//!
//! 1. admission against the global in-flight ceiling, widened by the
//!    waiter allowance in bounded-wait pool mode;
//! 2. result-cache lookup (reads only, unless the caller opts out);
//! 3. planning, which may rewrite the query text;
//! 4. connection acquisition from the [`ConnectionArbiter`];
//! 5. raw execution under the query deadline;
//! 6. slot release, cache population, metrics, and slow-query capture.
//!
//! The planner and the cache never call each other; only this module
//! knows the order. A `QueryEngine` is a cheap handle: clones share one
//! engine, and nothing is global, so tests can run isolated instances.

mod analysis;
mod batch;
mod maintenance;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStats, CacheWrite, Invalidation, ResultCache};
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::events::{EngineObserver, TracingObserver};
use crate::executor::RawExecutor;
use crate::metrics::{MetricsRecorder, QueryMetrics, SlowQuery};
use crate::model::{
    BatchChunkError, BatchOperation, BatchOptions, BatchOutcome, QueryKind, QueryOptions,
    QueryResult, Row, Statement,
};
use crate::planner::{
    DialectAnalyzer, HeuristicAnalyzer, OptimizationSuggestion, Planner, QueryPlan, SchemaCatalog,
};
use crate::pool::{ConnectionArbiter, PoolSnapshot};

pub use analysis::PerformanceReport;
pub use maintenance::MaintenanceReport;

use maintenance::MaintenanceTask;

/// Assembles a [`QueryEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    executor: Option<Arc<dyn RawExecutor>>,
    analyzer: Arc<dyn DialectAnalyzer>,
    observer: Arc<dyn EngineObserver>,
    catalog: SchemaCatalog,
}

impl EngineBuilder {
    /// Starts from `config` with the heuristic analyzer and tracing observer.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            executor: None,
            analyzer: Arc::new(HeuristicAnalyzer),
            observer: Arc::new(TracingObserver),
            catalog: SchemaCatalog::new(),
        }
    }

    /// Raw execute capability. Required.
    pub fn executor(mut self, executor: Arc<dyn RawExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the SQL analyzer.
    pub fn analyzer(mut self, analyzer: Arc<dyn DialectAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Replaces the event sink.
    pub fn observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Seeds the planner's schema catalog.
    pub fn catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Validates the configuration and builds the engine. Spawns the
    /// maintenance task when enabled and a tokio runtime is running.
    pub fn build(self) -> Result<QueryEngine> {
        self.config.validate()?;
        let executor = self
            .executor
            .ok_or_else(|| QueryError::Config("an executor is required".into()))?;
        let config = self.config;

        let inner = Arc::new(EngineInner {
            cache: ResultCache::new(config.cache.clone()),
            planner: Planner::with_catalog(config.planner.clone(), self.analyzer, self.catalog),
            pool: ConnectionArbiter::new(config.max_concurrent_queries, config.pool),
            metrics: MetricsRecorder::new(config.slow_query_history),
            executor,
            observer: self.observer,
            closed: AtomicBool::new(false),
            maintenance: Mutex::new(None),
            config,
        });

        if inner.config.maintenance.enabled {
            let task =
                MaintenanceTask::spawn(Arc::downgrade(&inner), inner.config.maintenance_interval());
            *inner.maintenance.lock() = task;
        }
        info!(
            max_concurrent = inner.config.max_concurrent_queries,
            timeout_ms = inner.config.query_timeout_ms,
            pool_mode = ?inner.config.pool,
            "engine.started"
        );
        Ok(QueryEngine { inner })
    }
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    cache: ResultCache,
    planner: Planner,
    pool: ConnectionArbiter,
    metrics: MetricsRecorder,
    executor: Arc<dyn RawExecutor>,
    observer: Arc<dyn EngineObserver>,
    closed: AtomicBool,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueryError::EngineClosed)
        } else {
            Ok(())
        }
    }

    /// Acquires a slot and runs the plan's text under the query deadline.
    /// The lease is dropped before returning on every path.
    async fn run_plan(
        &self,
        plan: &QueryPlan,
        params: &[Value],
    ) -> Result<(QueryResult, Duration)> {
        let lease = self.pool.lease().await.map_err(|err| {
            self.metrics.record_rejection();
            err
        })?;
        let timeout = self.config.query_timeout();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout,
            self.executor
                .execute(lease.slot(), &plan.rewritten_query, params, started + timeout),
        )
        .await;
        let elapsed = started.elapsed();
        drop(lease);

        match outcome {
            Err(_) => Err(QueryError::Timeout {
                timeout_ms: self.config.query_timeout_ms,
            }),
            Ok(Err(err)) => Err(QueryError::execution(err)),
            Ok(Ok(result)) => Ok((result, elapsed)),
        }
    }

    pub(crate) fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            expired_cache_entries: self.cache.purge_expired(),
            plans_trimmed: self
                .planner
                .retain_recent(self.config.planner.plan_table_capacity),
            slow_queries_trimmed: self
                .metrics
                .trim_slow_history(self.config.slow_query_history),
        };
        debug!(
            expired = report.expired_cache_entries,
            plans_trimmed = report.plans_trimmed,
            slow_trimmed = report.slow_queries_trimmed,
            "engine.maintenance.completed"
        );
        report
    }
}

/// Handle to a query engine. Clones share the same engine.
#[derive(Clone)]
pub struct QueryEngine {
    inner: Arc<EngineInner>,
}

impl QueryEngine {
    /// Builds an engine with default analyzer, observer and empty catalog.
    pub fn new(config: EngineConfig, executor: Arc<dyn RawExecutor>) -> Result<Self> {
        EngineBuilder::new(config).executor(executor).build()
    }

    /// Starts a builder.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Configuration the engine runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The engine's planner, for inspection.
    pub fn planner(&self) -> &Planner {
        &self.inner.planner
    }

    /// Whether [`QueryEngine::cleanup`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Executes one query.
    ///
    /// Cache hits return the stored `Arc` itself without planning or
    /// acquiring a connection. Only reads are cached; a successful write
    /// invalidates cached reads of the tables it touched when
    /// `invalidate_on_write` is set. Table matching ignores case.
    ///
    /// `SELECT *` is only expanded into explicit columns for tables whose
    /// columns are registered in the [`SchemaCatalog`]; with an empty
    /// catalog the text runs unchanged.
    pub async fn execute(
        &self,
        query: &str,
        params: &[Value],
        options: QueryOptions,
    ) -> Result<Arc<QueryResult>> {
        let inner = &*self.inner;
        inner.ensure_open()?;
        let _admitted = inner
            .metrics
            .admit(inner.config.admission_limit())
            .map_err(|err| {
                debug!(error = %err, "engine.query.rejected");
                err
            })?;

        let kind = options.kind.unwrap_or_else(|| QueryKind::from_sql(query));
        let cacheable =
            options.use_cache && kind == QueryKind::Select && inner.cache.config().enabled;
        let cache_key = cacheable.then(|| CacheKey::derive(query, params));
        if let Some(key) = cache_key {
            if let Some(hit) = inner.cache.get(key) {
                inner.metrics.record_cache_hit(kind);
                inner.observer.cache_hit(query, key);
                return Ok(hit);
            }
            inner.metrics.record_cache_miss();
        }

        let plan = inner.planner.plan_for(query, params);
        let (result, elapsed) = match inner.run_plan(&plan, params).await {
            Ok(done) => done,
            Err(err) => {
                if !err.is_rejection() {
                    inner.metrics.record_error();
                }
                inner.observer.query_failed(query, &err);
                return Err(err);
            }
        };

        inner.planner.record_execution(plan.plan_id, elapsed);
        inner
            .metrics
            .record_execution(kind, elapsed, &plan.indexes_referenced);
        inner.observer.query_executed(&plan, elapsed, options.priority);
        if elapsed > inner.config.slow_query_threshold() {
            let snapshot = inner
                .planner
                .plan(plan.plan_id)
                .unwrap_or_else(|| Arc::clone(&plan));
            inner.observer.slow_query(&snapshot, elapsed);
            inner.metrics.record_slow(snapshot, elapsed);
        }

        let result = Arc::new(result);
        if let Some(key) = cache_key {
            let ttl = options.ttl.unwrap_or_else(|| inner.config.default_ttl());
            let write = inner.cache.set(key, query, Arc::clone(&result), ttl);
            if let CacheWrite::Skipped(reason) = write {
                debug!(key = %key, reason = ?reason, "engine.cache.skipped");
            }
        }
        if kind.is_write() && inner.config.invalidate_on_write && !result.is_error() {
            for table in &plan.tables {
                let removed = inner.cache.invalidate(Invalidation::Table(table));
                if removed > 0 {
                    debug!(table = %table, removed, "engine.cache.invalidated");
                }
            }
        }
        Ok(result)
    }

    /// Runs `statements` in order with caching disabled, stopping at the
    /// first failure and returning that statement's error. Atomicity is
    /// the backing store's job.
    pub async fn execute_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<Arc<QueryResult>>> {
        self.inner.ensure_open()?;
        let observer = &self.inner.observer;
        self.inner.metrics.record_transaction();
        observer.transaction_started(statements.len());

        let started = Instant::now();
        let mut results = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            match self
                .execute(&statement.query, &statement.params, QueryOptions::uncached())
                .await
            {
                Ok(result) => results.push(result),
                Err(err) => {
                    observer.transaction_failed(index, &err);
                    return Err(err);
                }
            }
        }
        observer.transaction_completed(statements.len(), started.elapsed());
        Ok(results)
    }

    /// Applies `operation` to `rows` of `table` in chunks of `batch_size`.
    ///
    /// Best effort: a failed chunk is recorded in the outcome and later
    /// chunks still run. Updates and deletes identify rows by the
    /// configured `batch_key_column`.
    pub async fn execute_batch(
        &self,
        operation: BatchOperation,
        table: &str,
        rows: &[Row],
        options: BatchOptions,
    ) -> Result<BatchOutcome> {
        self.inner.ensure_open()?;
        batch::check_identifier(table, "table")?;
        let key = self.inner.config.batch_key_column.as_str();
        batch::check_identifier(key, "key column")?;
        let batch_size = options.batch_size.unwrap_or(self.inner.config.batch_size);
        if batch_size == 0 {
            return Err(QueryError::InvalidArgument(
                "batch_size must be at least 1".into(),
            ));
        }

        let observer = &self.inner.observer;
        let chunks = rows.len().div_ceil(batch_size);
        self.inner.metrics.record_batch();
        observer.batch_started(operation, table, rows.len(), chunks);

        let mut outcome = BatchOutcome::default();
        for (chunk_index, chunk) in rows.chunks(batch_size).enumerate() {
            let first_row = chunk_index * batch_size;
            outcome.chunks += 1;
            let executed = match batch::chunk_statement(operation, table, key, chunk, first_row) {
                Ok(statement) => self
                    .execute(
                        &statement.query,
                        &statement.params,
                        QueryOptions::uncached().kind(operation.kind()),
                    )
                    .await
                    .map_err(|err| err.to_string()),
                Err(message) => Err(message),
            };
            match executed {
                Ok(result) => outcome.affected_rows += result.rows_affected,
                Err(message) => {
                    let error = BatchChunkError {
                        chunk_index,
                        first_row,
                        rows: chunk.len(),
                        message,
                    };
                    observer.batch_chunk_failed(operation, table, &error);
                    outcome.errors.push(error);
                }
            }
        }
        observer.batch_completed(operation, table, &outcome);
        Ok(outcome)
    }

    /// Plans `query` (or returns the memoized plan) without executing it.
    pub fn explain(&self, query: &str, params: &[Value]) -> Result<Arc<QueryPlan>> {
        self.inner.ensure_open()?;
        Ok(self.inner.planner.plan_for(query, params))
    }

    /// Index suggestions for `queries`, or for every retained plan.
    pub fn suggest_indexes(&self, queries: Option<&[&str]>) -> Result<Vec<OptimizationSuggestion>> {
        self.inner.ensure_open()?;
        Ok(self.inner.planner.suggest_indexes(queries))
    }

    /// Drops cached results whose query text contains `pattern`, or all of
    /// them. Returns the number removed.
    pub fn clear_cache(&self, pattern: Option<&str>) -> Result<usize> {
        self.inner.ensure_open()?;
        let target = match pattern {
            Some(pattern) => Invalidation::Pattern(pattern),
            None => Invalidation::All,
        };
        let removed = self.inner.cache.invalidate(target);
        self.inner.observer.cache_cleared(pattern, removed);
        Ok(removed)
    }

    /// Applies `update` to the planner's schema catalog.
    pub fn update_catalog(&self, update: impl FnOnce(&mut SchemaCatalog)) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.planner.update_catalog(update);
        Ok(())
    }

    /// Counter snapshot. Still readable after cleanup.
    pub fn metrics(&self) -> QueryMetrics {
        self.inner.metrics.snapshot()
    }

    /// Retained slow queries, oldest first.
    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.inner.metrics.slow_queries()
    }

    /// Connection pool counters.
    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.inner.pool.snapshot()
    }

    /// Result cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Metrics, suggestions, slow queries and index usage in one report.
    pub fn analyze(&self) -> Result<PerformanceReport> {
        self.inner.ensure_open()?;
        let inner = &*self.inner;
        let plans = inner.planner.plans();
        Ok(analysis::build_report(
            inner.metrics.snapshot(),
            inner.metrics.slow_queries(),
            &plans,
            inner.planner.suggest_indexes(None),
            inner.config.max_concurrent_queries,
        ))
    }

    /// Runs one maintenance sweep now.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.inner.ensure_open()?;
        Ok(self.inner.run_maintenance())
    }

    /// Asks the background task to sweep now. Returns `false` when no
    /// task is running.
    pub fn trigger_maintenance(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        Ok(self
            .inner
            .maintenance
            .lock()
            .as_ref()
            .is_some_and(MaintenanceTask::trigger))
    }

    /// Stops the maintenance task, clears cache, plans and slow-query
    /// history, and closes the engine. Later calls fail with
    /// `EngineClosed`; calling this again does nothing.
    pub async fn cleanup(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self.inner.maintenance.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
        }
        let cleared = self.inner.cache.invalidate(Invalidation::All);
        self.inner.planner.clear();
        self.inner.metrics.clear_history();
        info!(cache_entries = cleared, "engine.cleanup.completed");
    }
}
