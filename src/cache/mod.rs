//! Result cache with TTL expiry and bulk eviction.
//!
//! Entries are visible only while `now - created_at < ttl`; expired entries
//! are dropped lazily on read and physically removed by
//! [`ResultCache::purge_expired`]. When the cache is full, the oldest quarter
//! of entries (by creation time) is evicted in one pass before inserting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::fingerprint::{normalize_query, value_fingerprint};
use crate::model::QueryResult;

/// Key of one cached `(query, parameters)` pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub u64);

impl CacheKey {
    /// Derives the key from normalized query text and hashed parameter values.
    pub fn derive(query: &str, params: &[Value]) -> Self {
        CacheKey(value_fingerprint(&normalize_query(query), params))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    query: String,
    /// Lower-cased `query`, for table matching.
    folded: String,
    result: Arc<QueryResult>,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Why a result was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Caching is switched off.
    Disabled,
    /// The result carries an error payload.
    ErrorResult,
    /// The encoded result exceeds the size ceiling.
    TooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },
    /// A zero TTL would never be visible.
    ZeroTtl,
}

/// Outcome of [`ResultCache::set`]. Skipping is a silent no-op, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    /// The entry was stored.
    Stored {
        /// Entries evicted to make room.
        evicted: usize,
    },
    /// The entry was not stored.
    Skipped(SkipReason),
}

impl CacheWrite {
    /// Whether the entry was stored.
    pub fn is_stored(&self) -> bool {
        matches!(self, CacheWrite::Stored { .. })
    }
}

/// Which entries [`ResultCache::invalidate`] removes.
#[derive(Debug, Clone, Copy)]
pub enum Invalidation<'a> {
    /// Entries whose query text contains the substring.
    Pattern(&'a str),
    /// Entries whose query text mentions the table, ignoring case.
    Table(&'a str),
    /// Every entry.
    All,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held, expired ones included until swept.
    pub entries: usize,
    /// Sum of hit counts over held entries.
    pub hits: u64,
    /// Entries removed by bulk eviction since creation.
    pub evicted: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    evicted: u64,
}

/// Capacity-bounded map from [`CacheKey`] to shared results.
pub struct ResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResultCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the live result for `key`, if any.
    pub fn get(&self, key: CacheKey) -> Option<Arc<QueryResult>> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: CacheKey, now: Instant) -> Option<Arc<QueryResult>> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&key)?;
        if entry.is_live(now) {
            entry.hit_count += 1;
            return Some(Arc::clone(&entry.result));
        }
        state.entries.remove(&key);
        None
    }

    /// Stores `result` under `key` unless it is ineligible.
    pub fn set(
        &self,
        key: CacheKey,
        query: &str,
        result: Arc<QueryResult>,
        ttl: Duration,
    ) -> CacheWrite {
        self.set_at(key, query, result, ttl, Instant::now())
    }

    pub(crate) fn set_at(
        &self,
        key: CacheKey,
        query: &str,
        result: Arc<QueryResult>,
        ttl: Duration,
        now: Instant,
    ) -> CacheWrite {
        if !self.config.enabled {
            return CacheWrite::Skipped(SkipReason::Disabled);
        }
        if result.is_error() {
            return CacheWrite::Skipped(SkipReason::ErrorResult);
        }
        if ttl.is_zero() {
            return CacheWrite::Skipped(SkipReason::ZeroTtl);
        }
        let size = result.encoded_len();
        if size > self.config.max_result_bytes {
            return CacheWrite::Skipped(SkipReason::TooLarge {
                size,
                limit: self.config.max_result_bytes,
            });
        }

        let mut state = self.state.lock();
        let mut evicted = 0;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_entries {
            evicted = evict_oldest_quarter(&mut state.entries);
            state.evicted += evicted as u64;
        }
        state.entries.insert(
            key,
            CacheEntry {
                query: query.to_string(),
                folded: query.to_lowercase(),
                result,
                created_at: now,
                ttl,
                hit_count: 0,
            },
        );
        CacheWrite::Stored { evicted }
    }

    /// Removes matching entries and returns how many were removed.
    pub fn invalidate(&self, target: Invalidation<'_>) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        match target {
            Invalidation::All => state.entries.clear(),
            Invalidation::Pattern(pattern) => {
                state.entries.retain(|_, entry| !entry.query.contains(pattern))
            }
            Invalidation::Table(table) => {
                let table = table.to_lowercase();
                state.entries.retain(|_, entry| !entry.folded.contains(&table))
            }
        }
        before - state.entries.len()
    }

    /// Physically removes expired entries.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        before - state.entries.len()
    }

    /// Entries currently held.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of size and hit totals.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.entries.values().map(|e| e.hit_count).sum(),
            evicted: state.evicted,
        }
    }
}

fn evict_oldest_quarter(entries: &mut HashMap<CacheKey, CacheEntry>) -> usize {
    let quota = (entries.len() / 4).max(1);
    let mut by_age: Vec<(Instant, CacheKey)> = entries
        .iter()
        .map(|(key, entry)| (entry.created_at, *key))
        .collect();
    by_age.sort_unstable();
    for (_, key) in by_age.iter().take(quota) {
        entries.remove(key);
    }
    quota
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use serde_json::json;

    fn cache(max_entries: usize) -> ResultCache {
        ResultCache::new(CacheConfig {
            max_entries,
            ..CacheConfig::default()
        })
    }

    fn result(n: u64) -> Arc<QueryResult> {
        Arc::new(QueryResult::affected(n))
    }

    #[test]
    fn hit_before_ttl_and_miss_after() {
        let cache = cache(10);
        let key = CacheKey::derive("SELECT 1", &[]);
        let t0 = Instant::now();
        let stored = result(1);
        assert!(cache
            .set_at(key, "SELECT 1", Arc::clone(&stored), Duration::from_secs(5), t0)
            .is_stored());

        let hit = cache.get_at(key, t0 + Duration::from_secs(4)).unwrap();
        assert!(Arc::ptr_eq(&hit, &stored));

        assert!(cache.get_at(key, t0 + Duration::from_secs(5)).is_none());
        assert_eq!(cache.len(), 0, "expired entry is dropped on read");

        let later = t0 + Duration::from_secs(6);
        assert!(cache
            .set_at(key, "SELECT 1", result(2), Duration::from_secs(5), later)
            .is_stored());
        assert_eq!(cache.get_at(key, later).unwrap().rows_affected, 2);
    }

    #[test]
    fn key_ignores_whitespace_but_not_params() {
        let a = CacheKey::derive("SELECT *  FROM t WHERE id = ?", &[json!(1)]);
        let b = CacheKey::derive("SELECT * FROM t\nWHERE id = ?", &[json!(1)]);
        let c = CacheKey::derive("SELECT * FROM t WHERE id = ?", &[json!(2)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn full_cache_evicts_oldest_quarter() {
        let cache = cache(8);
        let t0 = Instant::now();
        for i in 0..8u64 {
            let key = CacheKey(i);
            cache.set_at(
                key,
                "q",
                result(i),
                Duration::from_secs(60),
                t0 + Duration::from_millis(i),
            );
        }
        let write = cache.set_at(
            CacheKey(100),
            "q",
            result(100),
            Duration::from_secs(60),
            t0 + Duration::from_millis(50),
        );
        assert_eq!(write, CacheWrite::Stored { evicted: 2 });
        assert_eq!(cache.len(), 7);
        let now = t0 + Duration::from_millis(60);
        assert!(cache.get_at(CacheKey(0), now).is_none());
        assert!(cache.get_at(CacheKey(1), now).is_none());
        assert!(cache.get_at(CacheKey(2), now).is_some());
        assert!(cache.get_at(CacheKey(100), now).is_some());
        assert_eq!(cache.stats().evicted, 2);
    }

    #[test]
    fn overwrite_at_capacity_does_not_evict() {
        let cache = cache(2);
        cache.set(CacheKey(1), "q", result(1), Duration::from_secs(60));
        cache.set(CacheKey(2), "q", result(2), Duration::from_secs(60));
        let write = cache.set(CacheKey(2), "q", result(3), Duration::from_secs(60));
        assert_eq!(write, CacheWrite::Stored { evicted: 0 });
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ineligible_results_are_skipped() {
        let cache = ResultCache::new(CacheConfig {
            max_result_bytes: 64,
            ..CacheConfig::default()
        });
        let failed = Arc::new(QueryResult {
            error: Some("no such table".into()),
            ..QueryResult::default()
        });
        assert_eq!(
            cache.set(CacheKey(1), "q", failed, Duration::from_secs(1)),
            CacheWrite::Skipped(SkipReason::ErrorResult)
        );

        let mut row = Row::new();
        row.insert("blob".into(), json!("x".repeat(200)));
        let large = Arc::new(QueryResult::with_rows(vec![row]));
        assert!(matches!(
            cache.set(CacheKey(2), "q", large, Duration::from_secs(1)),
            CacheWrite::Skipped(SkipReason::TooLarge { limit: 64, .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = ResultCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        assert_eq!(
            cache.set(CacheKey(1), "q", result(1), Duration::from_secs(1)),
            CacheWrite::Skipped(SkipReason::Disabled)
        );
    }

    #[test]
    fn invalidate_by_pattern_and_all() {
        let cache = cache(10);
        let ttl = Duration::from_secs(60);
        cache.set(CacheKey(1), "SELECT * FROM projects", result(1), ttl);
        cache.set(CacheKey(2), "SELECT * FROM projects WHERE id = ?", result(2), ttl);
        cache.set(CacheKey(3), "SELECT * FROM users", result(3), ttl);

        assert_eq!(cache.invalidate(Invalidation::Pattern("projects")), 2);
        assert!(cache.get(CacheKey(3)).is_some());
        assert_eq!(cache.invalidate(Invalidation::All), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn table_invalidation_ignores_case() {
        let cache = cache(10);
        let ttl = Duration::from_secs(60);
        cache.set(CacheKey(1), "SELECT name FROM Projects WHERE id = ?", result(1), ttl);
        cache.set(CacheKey(2), "select * from PROJECTS", result(2), ttl);
        cache.set(CacheKey(3), "SELECT * FROM users", result(3), ttl);

        assert_eq!(cache.invalidate(Invalidation::Pattern("projects")), 0);
        assert_eq!(cache.invalidate(Invalidation::Table("projects")), 2);
        assert!(cache.get(CacheKey(3)).is_some());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = cache(10);
        let t0 = Instant::now();
        cache.set_at(CacheKey(1), "q", result(1), Duration::from_millis(10), t0);
        cache.set_at(CacheKey(2), "q", result(2), Duration::from_secs(10), t0);
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_millis(20)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hits_are_counted() {
        let cache = cache(10);
        cache.set(CacheKey(1), "q", result(1), Duration::from_secs(60));
        cache.get(CacheKey(1));
        cache.get(CacheKey(1));
        assert_eq!(cache.stats().hits, 2);
    }
}
