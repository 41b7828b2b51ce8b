//! Error handling for query execution.
//!
//! Every public engine API returns [`Result<T>`], whose error side is
//! [`QueryError`]. Admission failures (`PoolExhausted`,
//! `TooManyConcurrentQueries`) are surfaced immediately without retry;
//! callers that want retries can use [`crate::retry::with_retry`].
//!
//! Skipping a cache write is not an error and is reported through
//! [`crate::cache::CacheWrite`] instead.

use std::io;

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Error type produced by a [`crate::executor::RawExecutor`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while planning or executing queries.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No free connection slot and the pool is at its configured maximum.
    #[error("connection pool exhausted ({max} slots in use)")]
    PoolExhausted {
        /// Configured pool ceiling.
        max: usize,
    },

    /// The global in-flight ceiling was reached at admission.
    #[error("too many concurrent queries ({in_flight} in flight, max {max})")]
    TooManyConcurrentQueries {
        /// Queries in flight when the request was rejected.
        in_flight: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Execution exceeded the query deadline.
    #[error("query timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The raw executor reported a failure.
    #[error("execution failed: {message}")]
    Execution {
        /// Message reported by the executor.
        message: String,
    },

    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine has been torn down by [`crate::engine::QueryEngine::cleanup`].
    #[error("engine has been shut down")]
    EngineClosed,
}

impl QueryError {
    /// Wraps a raw executor failure.
    pub fn execution(err: impl std::fmt::Display) -> Self {
        QueryError::Execution {
            message: err.to_string(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::PoolExhausted { .. } => "PoolExhausted",
            QueryError::TooManyConcurrentQueries { .. } => "TooManyConcurrentQueries",
            QueryError::Timeout { .. } => "TimeoutError",
            QueryError::Execution { .. } => "ExecutionError",
            QueryError::InvalidArgument(_) => "InvalidArgument",
            QueryError::Config(_) => "InvalidConfig",
            QueryError::Io(_) => "Io",
            QueryError::EngineClosed => "EngineClosed",
        }
    }

    /// Whether a host may reasonably retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::PoolExhausted { .. }
                | QueryError::TooManyConcurrentQueries { .. }
                | QueryError::Timeout { .. }
        )
    }

    /// Whether the request was turned away before reaching the executor.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            QueryError::PoolExhausted { .. } | QueryError::TooManyConcurrentQueries { .. }
        )
    }
}

impl From<BoxError> for QueryError {
    fn from(err: BoxError) -> Self {
        QueryError::execution(err)
    }
}
