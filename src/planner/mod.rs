//! Query planning and optimization.
//!
//! The [`Planner`] turns `(query, parameters)` into a [`QueryPlan`]: a cost
//! estimate, the rewritten text to execute, the predicate columns, and the
//! indexes worth creating. Plans are memoized by [`PlanId`] in a table that
//! keeps the most recently *inserted* entries; reads do not refresh an entry.

/// Pluggable SQL analysis.
pub mod analyzer;

/// Host-registered schema knowledge.
pub mod catalog;

/// Static cost heuristic.
pub mod cost;

/// Plan identity and contents.
pub mod plan;

/// Ordered rewrite rules.
pub mod rewrite;

/// Advisory suggestions.
pub mod suggest;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::config::PlannerConfig;
use crate::fingerprint::{normalize_query, shape_fingerprint};
use crate::model::QueryKind;

pub use analyzer::{ColumnRef, DialectAnalyzer, HeuristicAnalyzer, QueryShape, TableRef};
pub use catalog::SchemaCatalog;
pub use cost::{estimate_cost, priority_for_cost};
pub use plan::{PlanId, QueryPlan};
pub use rewrite::RewriteRule;
pub use suggest::{IndexCandidate, OptimizationSuggestion, SuggestionKind};

/// Produces and memoizes query plans.
pub struct Planner {
    config: PlannerConfig,
    analyzer: Arc<dyn DialectAnalyzer>,
    catalog: RwLock<SchemaCatalog>,
    plans: Mutex<LruCache<PlanId, Arc<QueryPlan>>>,
    plans_created: AtomicU64,
}

impl Planner {
    /// Creates a planner with an empty catalog.
    pub fn new(config: PlannerConfig, analyzer: Arc<dyn DialectAnalyzer>) -> Self {
        Self::with_catalog(config, analyzer, SchemaCatalog::new())
    }

    /// Creates a planner seeded with `catalog`.
    pub fn with_catalog(
        config: PlannerConfig,
        analyzer: Arc<dyn DialectAnalyzer>,
        catalog: SchemaCatalog,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.plan_table_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            analyzer,
            catalog: RwLock::new(catalog),
            plans: Mutex::new(LruCache::new(capacity)),
            plans_created: AtomicU64::new(0),
        }
    }

    /// Computes the plan id for `(query, params)`.
    pub fn plan_id(query: &str, params: &[Value]) -> PlanId {
        PlanId(shape_fingerprint(&normalize_query(query), params))
    }

    /// Returns the memoized plan, computing and storing it on first sight.
    pub fn plan_for(&self, query: &str, params: &[Value]) -> Arc<QueryPlan> {
        let plan_id = Self::plan_id(query, params);
        if let Some(plan) = self.plans.lock().peek(&plan_id) {
            return Arc::clone(plan);
        }

        let plan = Arc::new(self.build_plan(plan_id, query, params));
        let mut plans = self.plans.lock();
        // Another caller may have planned the same query meanwhile.
        if let Some(existing) = plans.peek(&plan_id) {
            return Arc::clone(existing);
        }
        plans.push(plan_id, Arc::clone(&plan));
        self.plans_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            plan_id = %plan_id,
            cost = plan.estimated_cost,
            rewrites = plan.applied_optimizations.len(),
            "planner.plan.created"
        );
        plan
    }

    /// Plans `query` without touching the plan table.
    pub fn preview(&self, query: &str, params: &[Value]) -> QueryPlan {
        self.build_plan(Self::plan_id(query, params), query, params)
    }

    fn build_plan(&self, plan_id: PlanId, query: &str, params: &[Value]) -> QueryPlan {
        let shape = self.analyzer.analyze(query);
        let catalog = self.catalog.read();
        let rewritten =
            rewrite::apply_rules(self.analyzer.as_ref(), &catalog, &self.config, &shape, query);
        let candidates = suggest::index_candidates(&shape, &catalog);
        drop(catalog);

        let mut referenced: Vec<String> = Vec::new();
        for col in &shape.predicate_columns {
            if !referenced.contains(&col.column) {
                referenced.push(col.column.clone());
            }
        }
        QueryPlan {
            plan_id,
            original_query: query.to_string(),
            parameters: params.to_vec(),
            rewritten_query: rewritten.query,
            kind: shape.kind.unwrap_or(QueryKind::Other),
            tables: shape.tables.iter().map(|t| t.name.clone()).collect(),
            join_count: shape.joins,
            estimated_cost: estimate_cost(&shape),
            indexes_referenced: referenced,
            suggested_indexes: candidates.iter().map(IndexCandidate::name).collect(),
            applied_optimizations: rewritten.applied,
            execution_time: None,
            executions: 0,
            index_candidates: candidates,
        }
    }

    /// Records the latest execution time of a stored plan.
    pub fn record_execution(&self, plan_id: PlanId, elapsed: Duration) {
        if let Some(plan) = self.plans.lock().peek_mut(&plan_id) {
            let plan = Arc::make_mut(plan);
            plan.execution_time = Some(elapsed);
            plan.executions += 1;
        }
    }

    /// Stored plan by id.
    pub fn plan(&self, plan_id: PlanId) -> Option<Arc<QueryPlan>> {
        self.plans.lock().peek(&plan_id).cloned()
    }

    /// Stored plans, oldest insertion first.
    pub fn plans(&self) -> Vec<Arc<QueryPlan>> {
        let plans = self.plans.lock();
        plans.iter().rev().map(|(_, plan)| Arc::clone(plan)).collect()
    }

    /// Plans currently stored.
    pub fn len(&self) -> usize {
        self.plans.lock().len()
    }

    /// Whether no plan is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Plans computed since creation, evicted ones included.
    pub fn plans_created(&self) -> u64 {
        self.plans_created.load(Ordering::Relaxed)
    }

    /// Drops the oldest plans until at most `keep` remain.
    pub fn retain_recent(&self, keep: usize) -> usize {
        let mut plans = self.plans.lock();
        let mut removed = 0;
        while plans.len() > keep {
            if plans.pop_lru().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Removes every stored plan.
    pub fn clear(&self) {
        self.plans.lock().clear();
    }

    /// Applies `update` to the schema catalog. Existing plans keep the
    /// suggestions computed when they were created.
    pub fn update_catalog(&self, update: impl FnOnce(&mut SchemaCatalog)) {
        update(&mut *self.catalog.write());
    }

    /// Index suggestions for `queries`, or for every stored plan when `None`.
    pub fn suggest_indexes(&self, queries: Option<&[&str]>) -> Vec<OptimizationSuggestion> {
        match queries {
            Some(queries) => {
                let plans: Vec<QueryPlan> =
                    queries.iter().map(|q| self.preview(q, &[])).collect();
                suggest::index_suggestions(plans.iter())
            }
            None => {
                let plans = self.plans();
                suggest::index_suggestions(plans.iter().map(Arc::as_ref))
            }
        }
    }
}
