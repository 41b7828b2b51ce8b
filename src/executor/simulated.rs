use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};

use super::RawExecutor;
use crate::error::BoxError;
use crate::model::{QueryKind, QueryResult, Row};
use crate::pool::ConnectionSlot;

type FailureFn = Box<dyn Fn(&str, &[Value]) -> Option<String> + Send + Sync>;
type LatencyFn = Box<dyn Fn(&str) -> Option<Duration> + Send + Sync>;

/// In-memory stand-in for a database driver.
///
/// Sleeps for a configurable latency, then fabricates rows for reads and a
/// row count for writes. Records every statement it receives and the peak
/// number of concurrent calls, which tests use to check the engine's gates.
pub struct SimulatedExecutor {
    latency: Duration,
    jitter: Duration,
    rows_per_select: usize,
    fail_when: Option<FailureFn>,
    latency_for: Option<LatencyFn>,
    calls: AtomicU64,
    active: AtomicUsize,
    peak: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatedExecutor {
    /// Executor with a fixed latency and no failures.
    pub fn new(latency: Duration) -> Self {
        Self::builder().latency(latency).build()
    }

    /// Starts a builder with 1ms latency, no jitter and three rows per read.
    pub fn builder() -> SimulatedExecutorBuilder {
        SimulatedExecutorBuilder {
            latency: Duration::from_millis(1),
            jitter: Duration::ZERO,
            rows_per_select: 3,
            fail_when: None,
            latency_for: None,
        }
    }

    /// Statements received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Highest number of statements running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Text of every statement received, in arrival order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn latency_of(&self, query: &str) -> Duration {
        let base = self
            .latency_for
            .as_ref()
            .and_then(|f| f(query))
            .unwrap_or(self.latency);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_us = self.jitter.as_micros().min(u64::MAX as u128) as u64;
        base + Duration::from_micros(rand::thread_rng().gen_range(0..=jitter_us))
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl RawExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        _slot: &ConnectionSlot,
        query: &str,
        params: &[Value],
        _deadline: Instant,
    ) -> Result<QueryResult, BoxError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.executed.lock().push(query.to_string());
        let now_active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        let _active = ActiveCall(&self.active);
        self.peak.fetch_max(now_active, Ordering::AcqRel);

        let latency = self.latency_of(query);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.fail_when.as_ref().and_then(|f| f(query, params)) {
            return Err(message.into());
        }

        let kind = QueryKind::from_sql(query);
        let result = match kind {
            QueryKind::Select => QueryResult::with_rows(
                (0..self.rows_per_select)
                    .map(|n| fabricate_row(n, params))
                    .collect(),
            ),
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                QueryResult::affected(rows_touched(query))
            }
            QueryKind::Other => QueryResult::default(),
        };
        Ok(result)
    }
}

fn fabricate_row(n: usize, params: &[Value]) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(n + 1));
    row.insert("name".into(), json!(format!("row-{}", n + 1)));
    if let Some(first) = params.first() {
        row.insert("param".into(), first.clone());
    }
    row
}

/// Rows a write would touch: the size of a trailing `IN (...)` list, the
/// number of `VALUES` tuples, or one.
fn rows_touched(query: &str) -> u64 {
    let upper = query.to_ascii_uppercase();
    if let Some(pos) = upper.rfind(" IN (") {
        let list = &query[pos..];
        let end = list.find(')').unwrap_or(list.len());
        return list[..end].matches('?').count().max(1) as u64;
    }
    if let Some(pos) = upper.find(" VALUES") {
        return query[pos..].matches('(').count().max(1) as u64;
    }
    1
}

/// Configures a [`SimulatedExecutor`].
pub struct SimulatedExecutorBuilder {
    latency: Duration,
    jitter: Duration,
    rows_per_select: usize,
    fail_when: Option<FailureFn>,
    latency_for: Option<LatencyFn>,
}

impl SimulatedExecutorBuilder {
    /// Base latency of every statement.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Uniform random latency added on top of the base.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Rows fabricated for each read.
    pub fn rows_per_select(mut self, rows: usize) -> Self {
        self.rows_per_select = rows;
        self
    }

    /// Fails a statement with the returned message when `f` yields one.
    pub fn fail_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Option<String> + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(f));
        self
    }

    /// Overrides the base latency per statement when `f` yields one.
    pub fn latency_for<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<Duration> + Send + Sync + 'static,
    {
        self.latency_for = Some(Box::new(f));
        self
    }

    /// Builds the executor.
    pub fn build(self) -> SimulatedExecutor {
        SimulatedExecutor {
            latency: self.latency,
            jitter: self.jitter,
            rows_per_select: self.rows_per_select,
            fail_when: self.fail_when,
            latency_for: self.latency_for,
            calls: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }
}
