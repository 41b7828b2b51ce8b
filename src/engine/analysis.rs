//! Performance analysis combining live metrics with planner output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::metrics::{QueryMetrics, SlowQuery};
use crate::model::Priority;
use crate::planner::{OptimizationSuggestion, QueryPlan, SuggestionKind};

/// Hit ratio under which caching advice is given.
const LOW_HIT_RATIO: f64 = 0.5;
/// Joins from which a query counts as a denormalization candidate.
const JOIN_HEAVY: usize = 3;

/// Output of [`crate::engine::QueryEngine::analyze`].
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// Counter snapshot.
    pub metrics: QueryMetrics,
    /// Suggestions, most urgent first.
    pub suggestions: Vec<OptimizationSuggestion>,
    /// Retained slow queries, oldest first.
    pub slow_queries: Vec<SlowQuery>,
    /// Executions per referenced predicate column.
    pub index_usage: BTreeMap<String, u64>,
}

pub(crate) fn build_report(
    metrics: QueryMetrics,
    slow_queries: Vec<SlowQuery>,
    plans: &[Arc<QueryPlan>],
    index_suggestions: Vec<OptimizationSuggestion>,
    max_concurrent: usize,
) -> PerformanceReport {
    let mut suggestions = Vec::new();

    if let Some(ratio) = metrics.cache_hit_ratio() {
        if ratio < LOW_HIT_RATIO {
            suggestions.push(OptimizationSuggestion {
                kind: SuggestionKind::Query,
                priority: Priority::Medium,
                recommendation: "cache frequently repeated reads longer or batch lookups".into(),
                estimated_improvement: "fewer round trips for repeated reads".into(),
                rationale: format!(
                    "cache hit ratio is {:.1}% over {} lookups",
                    ratio * 100.0,
                    metrics.cached_queries + metrics.cache_misses
                ),
            });
        }
    }

    if metrics.slow_queries > 0 {
        suggestions.push(OptimizationSuggestion {
            kind: SuggestionKind::Query,
            priority: Priority::High,
            recommendation: "review the slow-query history and optimize the worst offenders".into(),
            estimated_improvement: "lower tail latency".into(),
            rationale: format!(
                "{} executions exceeded the slow-query threshold",
                metrics.slow_queries
            ),
        });
    }

    if metrics.rejections > 0 {
        suggestions.push(OptimizationSuggestion {
            kind: SuggestionKind::Connection,
            priority: Priority::Medium,
            recommendation: format!(
                "raise max_concurrent_queries above {max_concurrent} or switch the pool to bounded_wait"
            ),
            estimated_improvement: "fewer rejected requests under bursts".into(),
            rationale: format!(
                "{} requests were rejected at the concurrency ceiling",
                metrics.rejections
            ),
        });
    }

    let join_heavy: Vec<&Arc<QueryPlan>> =
        plans.iter().filter(|p| p.join_count >= JOIN_HEAVY).collect();
    if let Some(worst) = join_heavy.iter().max_by_key(|p| p.join_count) {
        suggestions.push(OptimizationSuggestion {
            kind: SuggestionKind::Schema,
            priority: Priority::Low,
            recommendation: "consider denormalizing or materializing frequently joined tables"
                .into(),
            estimated_improvement: "cheaper reads for join-heavy queries".into(),
            rationale: format!(
                "{} queries join {JOIN_HEAVY} or more tables (worst: {} joins over {})",
                join_heavy.len(),
                worst.join_count,
                worst.tables.join(", ")
            ),
        });
    }

    suggestions.extend(index_suggestions);
    suggestions.sort_by(|a, b| b.priority.cmp(&a.priority));

    PerformanceReport {
        index_usage: metrics.index_usage.clone(),
        metrics,
        suggestions,
        slow_queries,
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        writeln!(
            f,
            "queries:        {} ({} cached, {} executed)",
            m.total_queries, m.cached_queries, m.executed_queries
        )?;
        match m.cache_hit_ratio() {
            Some(ratio) => writeln!(f, "cache hit rate: {:.1}%", ratio * 100.0)?,
            None => writeln!(f, "cache hit rate: n/a")?,
        }
        writeln!(
            f,
            "latency:        avg {:.2}ms, recent {:.2}ms",
            m.average_execution_time.as_secs_f64() * 1_000.0,
            m.recent_average_time.as_secs_f64() * 1_000.0
        )?;
        writeln!(
            f,
            "errors:         {} ({} rejected, {} slow)",
            m.errors, m.rejections, m.slow_queries
        )?;
        if self.suggestions.is_empty() {
            return writeln!(f, "suggestions:    none");
        }
        writeln!(f, "suggestions:")?;
        for s in &self.suggestions {
            writeln!(f, "  [{}/{}] {}", s.priority, s.kind, s.recommendation)?;
            writeln!(f, "      {}", s.rationale)?;
        }
        Ok(())
    }
}
