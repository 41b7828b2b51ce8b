//! In-process notifications for the host application.
//!
//! The coordinator reports what it does through an [`EngineObserver`].
//! Every method has an empty default body, so an observer only overrides
//! the events it cares about. [`TracingObserver`] is installed unless the
//! host supplies its own.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::CacheKey;
use crate::error::QueryError;
use crate::model::{BatchChunkError, BatchOperation, BatchOutcome, Priority};
use crate::planner::QueryPlan;

/// Sink for engine events. Called synchronously on the request path, so
/// implementations should return quickly.
pub trait EngineObserver: Send + Sync {
    /// A raw execution completed.
    fn query_executed(&self, _plan: &QueryPlan, _elapsed: Duration, _priority: Priority) {}

    /// A request was served from cache.
    fn cache_hit(&self, _query: &str, _key: CacheKey) {}

    /// An execution exceeded the slow-query threshold.
    fn slow_query(&self, _plan: &QueryPlan, _elapsed: Duration) {}

    /// A request failed after admission.
    fn query_failed(&self, _query: &str, _error: &QueryError) {}

    /// A transaction of `statements` statements began.
    fn transaction_started(&self, _statements: usize) {}

    /// Every statement of a transaction succeeded.
    fn transaction_completed(&self, _statements: usize, _elapsed: Duration) {}

    /// The statement at `failed_at` failed and the rest were skipped.
    fn transaction_failed(&self, _failed_at: usize, _error: &QueryError) {}

    /// A batch began.
    fn batch_started(
        &self,
        _operation: BatchOperation,
        _table: &str,
        _rows: usize,
        _chunks: usize,
    ) {
    }

    /// One batch chunk failed; later chunks still run.
    fn batch_chunk_failed(
        &self,
        _operation: BatchOperation,
        _table: &str,
        _error: &BatchChunkError,
    ) {
    }

    /// A batch finished, possibly with chunk failures.
    fn batch_completed(&self, _operation: BatchOperation, _table: &str, _outcome: &BatchOutcome) {}

    /// Cache entries were invalidated on request.
    fn cache_cleared(&self, _pattern: Option<&str>, _removed: usize) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

impl EngineObserver for TracingObserver {
    fn query_executed(&self, plan: &QueryPlan, elapsed: Duration, priority: Priority) {
        debug!(
            plan_id = %plan.plan_id,
            kind = %plan.kind,
            priority = %priority,
            duration_ms = millis(elapsed),
            "engine.query.executed"
        );
    }

    fn cache_hit(&self, _query: &str, key: CacheKey) {
        debug!(key = %key, "engine.cache.hit");
    }

    fn slow_query(&self, plan: &QueryPlan, elapsed: Duration) {
        warn!(
            plan_id = %plan.plan_id,
            cost = plan.estimated_cost,
            duration_ms = millis(elapsed),
            query = %plan.rewritten_query,
            "engine.query.slow"
        );
    }

    fn query_failed(&self, query: &str, error: &QueryError) {
        warn!(code = error.code(), error = %error, query, "engine.query.failed");
    }

    fn transaction_started(&self, statements: usize) {
        debug!(statements, "engine.transaction.started");
    }

    fn transaction_completed(&self, statements: usize, elapsed: Duration) {
        info!(
            statements,
            duration_ms = millis(elapsed),
            "engine.transaction.completed"
        );
    }

    fn transaction_failed(&self, failed_at: usize, error: &QueryError) {
        warn!(failed_at, code = error.code(), error = %error, "engine.transaction.failed");
    }

    fn batch_started(&self, operation: BatchOperation, table: &str, rows: usize, chunks: usize) {
        debug!(operation = %operation, table, rows, chunks, "engine.batch.started");
    }

    fn batch_chunk_failed(&self, operation: BatchOperation, table: &str, error: &BatchChunkError) {
        warn!(
            operation = %operation,
            table,
            chunk = error.chunk_index,
            first_row = error.first_row,
            error = %error.message,
            "engine.batch.chunk_failed"
        );
    }

    fn batch_completed(&self, operation: BatchOperation, table: &str, outcome: &BatchOutcome) {
        info!(
            operation = %operation,
            table,
            affected_rows = outcome.affected_rows,
            chunks = outcome.chunks,
            failed_chunks = outcome.errors.len(),
            "engine.batch.completed"
        );
    }

    fn cache_cleared(&self, pattern: Option<&str>, removed: usize) {
        info!(pattern = pattern.unwrap_or("*"), removed, "engine.cache.cleared");
    }
}
