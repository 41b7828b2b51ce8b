//! Process-wide query counters and slow-query history.
//!
//! Counters are plain atomics updated around each execution. Maps and the
//! moving average live behind one mutex, and the slow-query history behind
//! another, so a snapshot never blocks an execution for long.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::error::QueryError;
use crate::model::QueryKind;
use crate::planner::QueryPlan;

/// Smoothing factor of the recent-latency moving average.
pub const EWMA_ALPHA: f64 = 0.2;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1_000.0)
}

/// Read-only snapshot of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryMetrics {
    /// Requests admitted past the concurrency gate.
    pub total_queries: u64,
    /// Requests served from the result cache.
    pub cached_queries: u64,
    /// Cache lookups that found nothing.
    pub cache_misses: u64,
    /// Raw executions that completed successfully.
    pub executed_queries: u64,
    /// Executions slower than the configured threshold.
    pub slow_queries: u64,
    /// Sum of successful execution times.
    #[serde(rename = "total_execution_ms", serialize_with = "as_millis")]
    pub total_execution_time: Duration,
    /// Mean successful execution time.
    #[serde(rename = "average_execution_ms", serialize_with = "as_millis")]
    pub average_execution_time: Duration,
    /// Exponentially weighted moving average of execution time.
    #[serde(rename = "recent_average_ms", serialize_with = "as_millis")]
    pub recent_average_time: Duration,
    /// Requests per statement kind, cache hits included.
    pub queries_by_type: BTreeMap<QueryKind, u64>,
    /// Executions per referenced predicate column.
    pub index_usage: BTreeMap<String, u64>,
    /// Failed executions (timeouts and executor errors).
    pub errors: u64,
    /// Requests currently between admission and completion.
    pub in_flight: usize,
    /// Requests rejected by the concurrency gate or the pool.
    pub rejections: u64,
    /// Transactions started.
    pub transactions: u64,
    /// Batches started.
    pub batches: u64,
}

impl QueryMetrics {
    /// Share of cache lookups that hit, or `None` before the first lookup.
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let lookups = self.cached_queries + self.cache_misses;
        if lookups == 0 {
            None
        } else {
            Some(self.cached_queries as f64 / lookups as f64)
        }
    }
}

/// One execution that exceeded the slow-query threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SlowQuery {
    /// Plan of the slow execution.
    pub plan: Arc<QueryPlan>,
    /// Measured execution time.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Wall-clock time of capture, milliseconds since the Unix epoch.
    pub recorded_at_ms: u64,
}

#[derive(Default)]
struct Breakdown {
    by_type: BTreeMap<QueryKind, u64>,
    index_usage: BTreeMap<String, u64>,
    ewma_ms: Option<f64>,
}

/// Collects counters and the bounded slow-query history.
pub struct MetricsRecorder {
    total_queries: AtomicU64,
    cached_queries: AtomicU64,
    cache_misses: AtomicU64,
    executed_queries: AtomicU64,
    slow_queries: AtomicU64,
    total_time_nanos: AtomicU64,
    errors: AtomicU64,
    rejections: AtomicU64,
    transactions: AtomicU64,
    batches: AtomicU64,
    in_flight: AtomicUsize,
    breakdown: Mutex<Breakdown>,
    slow_history: Mutex<VecDeque<SlowQuery>>,
    slow_capacity: usize,
}

impl MetricsRecorder {
    /// Creates a recorder keeping at most `slow_capacity` slow queries.
    pub fn new(slow_capacity: usize) -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            cached_queries: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            executed_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            total_time_nanos: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            breakdown: Mutex::new(Breakdown::default()),
            slow_history: Mutex::new(VecDeque::with_capacity(slow_capacity.min(1024))),
            slow_capacity,
        }
    }

    /// Admits one request unless `max` requests are already in flight.
    /// The returned guard holds the slot until dropped.
    pub fn admit(&self, max: usize) -> Result<InFlightGuard<'_>, QueryError> {
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            });
        match admitted {
            Ok(_) => {
                self.total_queries.fetch_add(1, Ordering::Relaxed);
                Ok(InFlightGuard { recorder: self })
            }
            Err(in_flight) => {
                self.record_rejection();
                Err(QueryError::TooManyConcurrentQueries { in_flight, max })
            }
        }
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Counts a request served from cache.
    pub fn record_cache_hit(&self, kind: QueryKind) {
        self.cached_queries.fetch_add(1, Ordering::Relaxed);
        *self.breakdown.lock().by_type.entry(kind).or_insert(0) += 1;
    }

    /// Counts a cache lookup that found nothing.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a successful raw execution.
    pub fn record_execution(&self, kind: QueryKind, elapsed: Duration, columns: &[String]) {
        self.executed_queries.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_time_nanos.fetch_add(nanos, Ordering::Relaxed);

        let sample_ms = elapsed.as_secs_f64() * 1_000.0;
        let mut breakdown = self.breakdown.lock();
        *breakdown.by_type.entry(kind).or_insert(0) += 1;
        for column in columns {
            *breakdown.index_usage.entry(column.clone()).or_insert(0) += 1;
        }
        breakdown.ewma_ms = Some(match breakdown.ewma_ms {
            None => sample_ms,
            Some(prev) => prev + EWMA_ALPHA * (sample_ms - prev),
        });
    }

    /// Counts a failed execution.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a request turned away at admission or by the pool.
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a started transaction.
    pub fn record_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a started batch.
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Appends to the slow-query history, dropping the oldest entry once
    /// the history is full.
    pub fn record_slow(&self, plan: Arc<QueryPlan>, duration: Duration) {
        self.slow_queries.fetch_add(1, Ordering::Relaxed);
        if self.slow_capacity == 0 {
            return;
        }
        let recorded_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut history = self.slow_history.lock();
        while history.len() >= self.slow_capacity {
            history.pop_front();
        }
        history.push_back(SlowQuery {
            plan,
            duration,
            recorded_at_ms,
        });
    }

    /// Slow queries, oldest first.
    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.slow_history.lock().iter().cloned().collect()
    }

    /// Drops the oldest slow queries until at most `keep` remain.
    pub fn trim_slow_history(&self, keep: usize) -> usize {
        let mut history = self.slow_history.lock();
        let excess = history.len().saturating_sub(keep);
        history.drain(..excess);
        excess
    }

    /// Empties the slow-query history. Counters are kept.
    pub fn clear_history(&self) {
        self.slow_history.lock().clear();
    }

    /// Consistent-enough snapshot of every counter.
    pub fn snapshot(&self) -> QueryMetrics {
        let executed = self.executed_queries.load(Ordering::Relaxed);
        let total_time = Duration::from_nanos(self.total_time_nanos.load(Ordering::Relaxed));
        let average = if executed == 0 {
            Duration::ZERO
        } else {
            total_time / executed.min(u32::MAX as u64) as u32
        };
        let breakdown = self.breakdown.lock();
        QueryMetrics {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            cached_queries: self.cached_queries.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            executed_queries: executed,
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            total_execution_time: total_time,
            average_execution_time: average,
            recent_average_time: breakdown
                .ewma_ms
                .map(|ms| Duration::from_secs_f64(ms / 1_000.0))
                .unwrap_or_default(),
            queries_by_type: breakdown.by_type.clone(),
            index_usage: breakdown.index_usage.clone(),
            errors: self.errors.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            rejections: self.rejections.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Holds one in-flight slot; releases it on drop.
pub struct InFlightGuard<'a> {
    recorder: &'a MetricsRecorder,
}

impl fmt::Debug for InFlightGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("in_flight", &self.recorder.in_flight())
            .finish()
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.recorder.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
