// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use super::OptimizerPass;
use crate::query::QueryResult;
use crate::query::ir::{OrderKey, ProjectionExpr, Select, SqlExpr};

/// Moves orderings out of subqueries into the outermost select.
///
/// Paging needs a single `ORDER BY` at the top, and the dialect rejects
/// ordering inside subqueries that have no `TOP`. Keys of the outer select
/// stay primary; keys lifted from below follow in their original order. A
/// subquery with a row limit keeps its ordering (it decides which rows
/// survive) and a copy is lifted. Orderings below an aggregate are dropped.
pub struct OrderByHoisting;

impl OptimizerPass for OrderByHoisting {
    fn name(&self) -> &str {
        "OrderByHoisting"
    }

    fn apply(&self, projection: &ProjectionExpr) -> QueryResult<ProjectionExpr> {
        let mut projection = projection.clone();
        hoist(&mut projection.select);
        Ok(projection)
    }

    fn applicable(&self, projection: &ProjectionExpr) -> bool {
        has_nested_ordering(&projection.select)
    }
}

fn has_nested_ordering(select: &Select) -> bool {
    select
        .from
        .selects()
        .into_iter()
        .any(|child| !child.order_by.is_empty() || has_nested_ordering(child))
}

fn hoist(select: &mut Select) {
    let aggregate = select.is_aggregate();
    let mut lifted: Vec<OrderKey> = Vec::new();

    for child in select.from.selects_mut() {
        hoist(child);
        if child.order_by.is_empty() {
            continue;
        }
        let keys = if child.take.is_some() || child.paging.is_some() {
            child.order_by.clone()
        } else {
            std::mem::take(&mut child.order_by)
        };
        if aggregate {
            continue;
        }
        for key in keys {
            if let Some(expr) = lift(child, &key.expr) {
                lifted.push(OrderKey {
                    expr,
                    descending: key.descending,
                });
            }
        }
    }

    for key in lifted {
        if !select.order_by.iter().any(|k| k.expr == key.expr) {
            select.order_by.push(key);
        }
    }
}

/// Expose `expr` through `child` so its parent can order by it
pub(crate) fn lift(child: &mut Select, expr: &SqlExpr) -> Option<SqlExpr> {
    let existing = child.columns.iter().find(|c| &c.expr == expr).map(|c| c.name.clone());
    let name = match existing {
        Some(name) => name,
        // a new column would change which rows are distinct or grouped
        None if child.distinct || child.is_aggregate() => return None,
        None => child.ensure_column(expr),
    };
    child.output_ref(&name)
}
