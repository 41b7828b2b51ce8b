//! Static cost heuristic.
//!
//! The score only ranks queries for slow-query triage and suggestion
//! priority; it never influences how a query is executed.

use super::analyzer::QueryShape;
use crate::model::Priority;

const BASE_COST: u32 = 1;
const JOIN_WEIGHT: u32 = 5;
const GROUP_BY_WEIGHT: u32 = 3;
const ORDER_BY_WEIGHT: u32 = 2;
const WHERE_WEIGHT: u32 = 1;
const SUBQUERY_WEIGHT: u32 = 2;

/// Scores a query shape: 1, plus 5 per join, 3 per group-by, 2 per
/// order-by, 1 per where and 2 per parenthesis group.
pub fn estimate_cost(shape: &QueryShape) -> u32 {
    let weighted = |count: usize, weight: u32| {
        u32::try_from(count)
            .unwrap_or(u32::MAX)
            .saturating_mul(weight)
    };
    BASE_COST
        .saturating_add(weighted(shape.joins, JOIN_WEIGHT))
        .saturating_add(weighted(shape.group_bys, GROUP_BY_WEIGHT))
        .saturating_add(weighted(shape.order_bys, ORDER_BY_WEIGHT))
        .saturating_add(weighted(shape.wheres, WHERE_WEIGHT))
        .saturating_add(weighted(shape.paren_groups, SUBQUERY_WEIGHT))
}

/// Maps a cost to a suggestion priority: above 8 is high, above 4 medium.
pub fn priority_for_cost(cost: u32) -> Priority {
    if cost > 8 {
        Priority::High
    } else if cost > 4 {
        Priority::Medium
    } else {
        Priority::Low
    }
}
