//! Engine configuration.
//!
//! [`EngineConfig`] carries every tunable the engine reads. It can be built
//! in code, taken from a preset, or loaded from TOML:
//!
//! ```toml
//! max_concurrent_queries = 32
//! query_timeout_ms = 5000
//!
//! [cache]
//! max_entries = 5000
//! default_ttl_ms = 60000
//!
//! [pool]
//! mode = "bounded_wait"
//! max_waiters = 64
//! wait_timeout_ms = 250
//! ```
//!
//! Missing keys fall back to [`EngineConfig::default`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether results are cached at all.
    pub enabled: bool,
    /// Entry count that triggers bulk eviction of the oldest quarter.
    pub max_entries: usize,
    /// TTL used when a query does not supply its own.
    pub default_ttl_ms: u64,
    /// Results whose JSON encoding exceeds this many bytes are never cached.
    pub max_result_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_ttl_ms: 300_000,
            max_result_bytes: 100_000,
        }
    }
}

/// Planner settings; each rewrite rule can be switched off on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Number of plans retained, oldest insertion evicted first.
    pub plan_table_capacity: usize,
    /// Replace `SELECT *` with the catalog's column list.
    pub expand_wildcard: bool,
    /// Append a row cap to ordered queries that have no `LIMIT`.
    pub cap_unbounded_order: bool,
    /// Row cap used by `cap_unbounded_order`.
    pub row_cap: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            plan_table_capacity: 1000,
            expand_wildcard: true,
            cap_unbounded_order: true,
            row_cap: 1000,
        }
    }
}

/// Behaviour of the connection arbiter once every slot is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PoolMode {
    /// Reject immediately with `PoolExhausted`.
    #[default]
    FailFast,
    /// Park up to `max_waiters` callers, each for at most `wait_timeout_ms`.
    BoundedWait {
        /// Callers allowed to wait at once; further callers are rejected.
        max_waiters: usize,
        /// How long a parked caller waits before giving up.
        wait_timeout_ms: u64,
    },
}

/// Background sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Whether the engine spawns the periodic sweep.
    pub enabled: bool,
    /// Interval between sweeps.
    pub interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 300_000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling shared by the admission gate and the connection pool.
    pub max_concurrent_queries: usize,
    /// Hard deadline for a single raw execution.
    pub query_timeout_ms: u64,
    /// Executions slower than this are recorded as slow queries.
    pub slow_query_threshold_ms: u64,
    /// Maximum retained slow queries (FIFO).
    pub slow_query_history: usize,
    /// Rows per chunk in `execute_batch`.
    pub batch_size: usize,
    /// Column identifying rows for batched updates and deletes.
    pub batch_key_column: String,
    /// Attempts used by [`crate::retry::RetryPolicy::from_config`].
    pub retry_attempts: u32,
    /// Base delay between retries.
    pub retry_delay_ms: u64,
    /// Drop cached reads of a table after a successful write to it.
    pub invalidate_on_write: bool,
    /// Result cache settings.
    pub cache: CacheConfig,
    /// Planner settings.
    pub planner: PlannerConfig,
    /// Pool exhaustion behaviour.
    pub pool: PoolMode,
    /// Periodic sweep settings.
    pub maintenance: MaintenanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 10,
            query_timeout_ms: 30_000,
            slow_query_threshold_ms: 1_000,
            slow_query_history: 100,
            batch_size: 100,
            batch_key_column: "id".to_string(),
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            invalidate_on_write: true,
            cache: CacheConfig::default(),
            planner: PlannerConfig::default(),
            pool: PoolMode::FailFast,
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Short deadlines and intervals suited to tests and local experiments.
    pub fn testing() -> Self {
        Self {
            max_concurrent_queries: 4,
            query_timeout_ms: 1_000,
            slow_query_threshold_ms: 50,
            retry_delay_ms: 10,
            maintenance: MaintenanceConfig {
                enabled: false,
                interval_ms: 50,
            },
            ..Self::default()
        }
    }

    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| QueryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_queries == 0 {
            return Err(QueryError::Config(
                "max_concurrent_queries must be at least 1".into(),
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(QueryError::Config("query_timeout_ms must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(QueryError::Config("batch_size must be at least 1".into()));
        }
        if self.batch_key_column.trim().is_empty() {
            return Err(QueryError::Config("batch_key_column cannot be empty".into()));
        }
        if self.cache.max_entries == 0 {
            return Err(QueryError::Config("cache.max_entries must be at least 1".into()));
        }
        if self.planner.plan_table_capacity == 0 {
            return Err(QueryError::Config(
                "planner.plan_table_capacity must be at least 1".into(),
            ));
        }
        if self.maintenance.enabled && self.maintenance.interval_ms == 0 {
            return Err(QueryError::Config(
                "maintenance.interval_ms must be positive when enabled".into(),
            ));
        }
        if let PoolMode::BoundedWait {
            wait_timeout_ms, ..
        } = self.pool
        {
            if wait_timeout_ms == 0 {
                return Err(QueryError::Config(
                    "pool.wait_timeout_ms must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Requests the admission gate lets in at once. In bounded-wait mode
    /// this leaves room for `max_waiters` callers to park in the pool.
    pub fn admission_limit(&self) -> usize {
        match self.pool {
            PoolMode::FailFast => self.max_concurrent_queries,
            PoolMode::BoundedWait { max_waiters, .. } => {
                self.max_concurrent_queries.saturating_add(max_waiters)
            }
        }
    }

    /// Deadline applied to each raw execution.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Latency above which an execution counts as slow.
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    /// TTL for cache writes that do not specify one.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.default_ttl_ms)
    }

    /// Interval between maintenance sweeps.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance.interval_ms)
    }
}
