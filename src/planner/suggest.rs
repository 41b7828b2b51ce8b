//! Advisory tuning suggestions.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::analyzer::QueryShape;
use super::catalog::SchemaCatalog;
use super::cost::priority_for_cost;
use super::plan::QueryPlan;
use crate::model::Priority;

/// Area a suggestion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Create an index.
    Index,
    /// Change query text or caching strategy.
    Query,
    /// Change the schema.
    Schema,
    /// Change connection or concurrency settings.
    Connection,
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SuggestionKind::Index => "index",
            SuggestionKind::Query => "query",
            SuggestionKind::Schema => "schema",
            SuggestionKind::Connection => "connection",
        };
        f.write_str(label)
    }
}

/// Derived, never persisted; regenerated on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationSuggestion {
    /// Area the suggestion targets.
    pub kind: SuggestionKind,
    /// Urgency.
    pub priority: Priority,
    /// What to do.
    pub recommendation: String,
    /// Expected effect, human readable.
    pub estimated_improvement: String,
    /// Why the suggestion was made.
    pub rationale: String,
}

/// A missing single-column index on a predicate column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexCandidate {
    /// Table to index.
    pub table: String,
    /// Column to index.
    pub column: String,
}

impl IndexCandidate {
    /// Conventional index name, `idx_<table>_<column>`.
    pub fn name(&self) -> String {
        format!("idx_{}_{}", self.table.replace('.', "_"), self.column)
    }

    /// DDL that would create the index.
    pub fn ddl(&self) -> String {
        format!("CREATE INDEX {} ON {} ({})", self.name(), self.table, self.column)
    }
}

/// Predicate columns of `shape` not covered by a registered index.
pub(crate) fn index_candidates(shape: &QueryShape, catalog: &SchemaCatalog) -> Vec<IndexCandidate> {
    let mut out: Vec<IndexCandidate> = Vec::new();
    for column in &shape.predicate_columns {
        let Some(table) = shape.resolve_table(column) else {
            continue;
        };
        if catalog.is_indexed(table, &column.column) {
            continue;
        }
        let candidate = IndexCandidate {
            table: table.to_string(),
            column: column.column.clone(),
        };
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn improvement_for(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "50-90% faster lookups on large tables",
        Priority::Medium => "20-50% faster lookups",
        Priority::Low => "up to 20% faster lookups",
    }
}

/// One `create index` suggestion per missing index across `plans`,
/// keeping the highest priority when several plans want the same index.
pub(crate) fn index_suggestions<'a, I>(plans: I) -> Vec<OptimizationSuggestion>
where
    I: IntoIterator<Item = &'a QueryPlan>,
{
    let mut by_index: BTreeMap<String, OptimizationSuggestion> = BTreeMap::new();
    for plan in plans {
        let priority = priority_for_cost(plan.estimated_cost);
        for candidate in &plan.index_candidates {
            let suggestion = OptimizationSuggestion {
                kind: SuggestionKind::Index,
                priority,
                recommendation: candidate.ddl(),
                estimated_improvement: improvement_for(priority).to_string(),
                rationale: format!(
                    "column {}.{} is filtered or joined on without an index (query cost {})",
                    candidate.table, candidate.column, plan.estimated_cost
                ),
            };
            by_index
                .entry(candidate.name())
                .and_modify(|existing| {
                    if suggestion.priority > existing.priority {
                        *existing = suggestion.clone();
                    }
                })
                .or_insert(suggestion);
        }
    }
    let mut out: Vec<_> = by_index.into_values().collect();
    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}
