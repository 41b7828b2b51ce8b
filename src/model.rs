//! Request and result types shared by the engine's subsystems.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Result of a raw execution. The engine treats it as opaque apart from
/// sizing it for the cache and reading `rows_affected` for batches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Returned rows.
    pub rows: Vec<Row>,
    /// Rows written by an insert, update or delete.
    pub rows_affected: u64,
    /// Set when the executor produced an error payload instead of failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Result carrying rows only.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Result of a write touching `rows_affected` rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Whether the result represents an error payload.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Size of the JSON encoding, used for the cache ceiling.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|buf| buf.len()).unwrap_or(usize::MAX)
    }
}

/// Statement category, used for per-type counters and cache eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// `SELECT` (including `WITH ... SELECT`).
    Select,
    /// `INSERT`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// Anything else (DDL, pragmas, ...).
    Other,
}

impl QueryKind {
    /// Classifies a statement by its leading keyword.
    pub fn from_sql(query: &str) -> Self {
        let head = query
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("");
        match head.to_ascii_uppercase().as_str() {
            "SELECT" | "WITH" => QueryKind::Select,
            "INSERT" => QueryKind::Insert,
            "UPDATE" => QueryKind::Update,
            "DELETE" => QueryKind::Delete,
            _ => QueryKind::Other,
        }
    }

    /// Whether the statement modifies data.
    pub fn is_write(self) -> bool {
        matches!(self, QueryKind::Insert | QueryKind::Update | QueryKind::Delete)
    }

    /// Lower-case label used in metrics maps.
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Select => "select",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Other => "other",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority attached to requests and suggestions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority.
    #[default]
    Medium,
    /// High priority.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => f.write_str("low"),
            Priority::Medium => f.write_str("medium"),
            Priority::High => f.write_str("high"),
        }
    }
}

/// Per-call options for [`crate::engine::QueryEngine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Consult and populate the result cache.
    pub use_cache: bool,
    /// TTL for the cache entry; the configured default when `None`.
    pub ttl: Option<Duration>,
    /// Caller priority, carried into events and logs.
    pub priority: Priority,
    /// Overrides the statement kind detected from the query text.
    pub kind: Option<QueryKind>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            ttl: None,
            priority: Priority::Medium,
            kind: None,
        }
    }
}

impl QueryOptions {
    /// Options that bypass the cache entirely.
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    /// Sets the cache TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the caller priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the statement kind.
    pub fn kind(mut self, kind: QueryKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// One statement of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Query text.
    pub query: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Statement {
    /// Builds a statement.
    pub fn new(query: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }
}

/// Operation applied by [`crate::engine::QueryEngine::execute_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    /// Multi-row insert.
    Insert,
    /// Keyed update.
    Update,
    /// Keyed delete.
    Delete,
}

impl BatchOperation {
    /// Statement kind produced by the operation.
    pub fn kind(self) -> QueryKind {
        match self {
            BatchOperation::Insert => QueryKind::Insert,
            BatchOperation::Update => QueryKind::Update,
            BatchOperation::Delete => QueryKind::Delete,
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// Per-call options for batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOptions {
    /// Rows per chunk; the configured `batch_size` when `None`.
    pub batch_size: Option<usize>,
}

/// Failure of one batch chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchChunkError {
    /// Zero-based chunk index.
    pub chunk_index: usize,
    /// Index of the chunk's first row in the submitted rows.
    pub first_row: usize,
    /// Rows in the chunk.
    pub rows: usize,
    /// Failure message.
    pub message: String,
}

/// Outcome of a best-effort batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Rows affected by the chunks that succeeded.
    pub affected_rows: u64,
    /// Chunks executed, failed ones included.
    pub chunks: usize,
    /// Per-chunk failures.
    pub errors: Vec<BatchChunkError>,
}

impl BatchOutcome {
    /// Whether every chunk succeeded.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}
