//! Querygate: a query execution and optimization layer that sits between an
//! application and its database driver.
//!
//! Requests go through [`QueryEngine`], which serves reads from a TTL
//! result cache, plans and rewrites queries, bounds concurrency with a
//! logical connection pool, runs the host's [`RawExecutor`] under a
//! deadline, and keeps the metrics and slow-query history behind
//! [`QueryEngine::analyze`].

#![warn(missing_docs)]

/// Result cache.
pub mod cache;
/// Engine configuration.
pub mod config;
/// Execution coordinator and lifecycle.
pub mod engine;
/// Error taxonomy.
pub mod error;
/// Observer hooks.
pub mod events;
/// Raw execute capability.
pub mod executor;
/// Query and parameter fingerprints.
pub mod fingerprint;
/// `tracing` bootstrap.
pub mod logging;
/// Counters and slow-query history.
pub mod metrics;
/// Shared request and result types.
pub mod model;
/// Query planner and optimizer.
pub mod planner;
/// Connection arbiter.
pub mod pool;
/// Host-driven retries.
pub mod retry;

pub use config::{EngineConfig, PoolMode};
pub use engine::{EngineBuilder, MaintenanceReport, PerformanceReport, QueryEngine};
pub use error::{QueryError, Result};
pub use events::{EngineObserver, NoopObserver, TracingObserver};
pub use executor::{RawExecutor, SimulatedExecutor};
pub use metrics::{QueryMetrics, SlowQuery};
pub use model::{
    BatchOperation, BatchOptions, BatchOutcome, Priority, QueryKind, QueryOptions, QueryResult,
    Row, Statement,
};
pub use planner::{OptimizationSuggestion, QueryPlan, SchemaCatalog, SuggestionKind};
