use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::suggest::IndexCandidate;
use crate::model::QueryKind;

/// Stable identity of a normalized query and its parameter shape.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlanId(pub u64);

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Optimization outcome for one query. Immutable after creation apart from
/// the execution bookkeeping updated by
/// [`Planner::record_execution`](super::Planner::record_execution).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Stable identity.
    pub plan_id: PlanId,
    /// Query text as first submitted.
    pub original_query: String,
    /// Parameters as first submitted.
    pub parameters: Vec<Value>,
    /// Text to execute; equals `original_query` when no rule applied.
    pub rewritten_query: String,
    /// Statement kind.
    pub kind: QueryKind,
    /// Tables referenced.
    pub tables: Vec<String>,
    /// Joins counted in the query text.
    pub join_count: usize,
    /// Static cost score.
    pub estimated_cost: u32,
    /// Columns compared in `WHERE` and `JOIN ... ON` predicates.
    pub indexes_referenced: Vec<String>,
    /// Names of proposed indexes, not yet created.
    pub suggested_indexes: Vec<String>,
    /// Descriptions of applied rewrites, in order.
    pub applied_optimizations: Vec<String>,
    /// Duration of the latest execution.
    pub execution_time: Option<Duration>,
    /// Executions recorded against this plan.
    pub executions: u64,
    #[serde(skip)]
    pub(crate) index_candidates: Vec<IndexCandidate>,
}

impl QueryPlan {
    /// Whether any rewrite changed the query text.
    pub fn is_rewritten(&self) -> bool {
        self.rewritten_query != self.original_query
    }
}
