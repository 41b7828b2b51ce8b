//! Ordered rewrite rules.

use super::analyzer::{DialectAnalyzer, QueryShape};
use super::catalog::SchemaCatalog;
use crate::config::PlannerConfig;
use crate::model::QueryKind;

/// A rewrite the planner may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteRule {
    /// Replace `SELECT *` with the catalog's column list.
    ExpandWildcard,
    /// Append a row cap to ordered queries without `LIMIT`.
    CapUnboundedOrder,
}

impl RewriteRule {
    /// Rules in application order.
    pub const ALL: [RewriteRule; 2] = [RewriteRule::ExpandWildcard, RewriteRule::CapUnboundedOrder];

    fn enabled(self, config: &PlannerConfig) -> bool {
        match self {
            RewriteRule::ExpandWildcard => config.expand_wildcard,
            RewriteRule::CapUnboundedOrder => config.cap_unbounded_order,
        }
    }
}

/// Text after rewriting plus a description of each applied rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Query text to execute.
    pub query: String,
    /// One entry per applied rule, in order.
    pub applied: Vec<String>,
}

pub(crate) fn apply_rules(
    analyzer: &dyn DialectAnalyzer,
    catalog: &SchemaCatalog,
    config: &PlannerConfig,
    shape: &QueryShape,
    query: &str,
) -> Rewritten {
    let mut current = query.to_string();
    let mut applied = Vec::new();
    for rule in RewriteRule::ALL {
        if !rule.enabled(config) {
            continue;
        }
        match rule {
            RewriteRule::ExpandWildcard => {
                if !shape.wildcard_projection || shape.joins > 0 || shape.tables.len() != 1 {
                    continue;
                }
                let Some(table) = shape.primary_table() else {
                    continue;
                };
                let Some(columns) = catalog.columns(table) else {
                    continue;
                };
                if let Some(next) = analyzer.expand_wildcard(&current, columns) {
                    applied.push(format!(
                        "expanded SELECT * into {} explicit columns of {table}",
                        columns.len()
                    ));
                    current = next;
                }
            }
            RewriteRule::CapUnboundedOrder => {
                if shape.kind != Some(QueryKind::Select) || shape.order_bys == 0 || shape.has_limit
                {
                    continue;
                }
                if let Some(next) = analyzer.append_row_cap(&current, config.row_cap) {
                    applied.push(format!(
                        "capped unbounded ORDER BY at {} rows",
                        config.row_cap
                    ));
                    current = next;
                }
            }
        }
    }
    Rewritten {
        query: current,
        applied,
    }
}
