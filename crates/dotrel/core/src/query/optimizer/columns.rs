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
use crate::query::ir::{ColumnDecl, ProjectionExpr, Select};
use std::collections::HashSet;

/// Drops projected columns nobody reads.
///
/// The top select keeps what the projector reads; every subquery keeps what
/// its parent's columns, predicate, ordering and join conditions reference.
/// References are collected before descending, so a column used only from an
/// outer select survives in the inner one. `DISTINCT` selects are left alone
/// and at least one column always remains.
pub struct UnusedColumnPruning;

impl OptimizerPass for UnusedColumnPruning {
    fn name(&self) -> &str {
        "UnusedColumnPruning"
    }

    fn apply(&self, projection: &ProjectionExpr) -> QueryResult<ProjectionExpr> {
        let mut projection = projection.clone();
        let top = projection.select.alias;
        let used: HashSet<String> = projection
            .shape
            .projected_leaves()
            .into_iter()
            .flat_map(|leaf| {
                let mut names = Vec::new();
                leaf.visit_columns(&mut |c| {
                    if c.alias == top {
                        names.push(c.name.clone());
                    }
                });
                names
            })
            .collect();

        prune(&mut projection.select, &used);
        projection.shape.retain_available(&projection.select);
        Ok(projection)
    }
}

fn prune(select: &mut Select, used: &HashSet<String>) {
    if !select.distinct {
        let mut kept: Vec<ColumnDecl> = select.columns.iter().filter(|c| used.contains(&c.name)).cloned().collect();
        if kept.is_empty() {
            kept.extend(select.columns.first().cloned());
        }
        select.columns = kept;
    }

    let references = select.own_references();
    for child in select.from.selects_mut() {
        let used = references.get(&child.alias).cloned().unwrap_or_default();
        prune(child, &used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnType, EntityDescriptor};
    use crate::query::binder::Binder;
    use crate::query::builder::QueryExpr;
    use crate::query::expr::{field, tuple, Lambda};
    use crate::query::ir::{Shape, Source};
    use crate::query::ir::SqlExpr;
    use std::sync::Arc;

    fn reads_only(expr: &SqlExpr, select: &Select) -> bool {
        let mut all = true;
        expr.visit_columns(&mut |c| all &= c.alias == select.alias && select.column(&c.name).is_some());
        all
    }

    fn session() -> Arc<QueryExpr> {
        Arc::new(QueryExpr::Source(Arc::new(
            EntityDescriptor::new("Session").promote("ShopId", ColumnType::Int).promote("Till", ColumnType::Text),
        )))
    }

    #[test]
    fn test_top_keeps_projected_entity_columns() {
        let projection = Binder::new().bind(&session()).unwrap();
        let pruned = UnusedColumnPruning.apply(&projection).unwrap();
        let names: Vec<_> = pruned.select.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["SessionId", "Document", "CreatedBy", "ChangedBy", "CreatedTimestamp", "ChangedTimestamp"]);
        match &pruned.shape {
            Shape::Entity { columns, .. } => assert_eq!(columns.len(), 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outer_reference_survives_in_inner_select() {
        let filtered = Arc::new(QueryExpr::Where {
            source: session(),
            predicate: Lambda::unary(field("ShopId").eq(1)),
        });
        let query = QueryExpr::Select {
            source: filtered,
            selector: Lambda::unary(tuple([("Till", field("Till"))])),
        };
        let projection = Binder::new().bind(&query).unwrap();
        let pruned = UnusedColumnPruning.apply(&projection).unwrap();

        let where_select = match &pruned.select.from {
            Source::Select(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        let names: Vec<_> = where_select.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Till"]);

        // the predicate of the filter still reads ShopId from its own source
        let source_select = match &where_select.from {
            Source::Select(s) => s,
            other => panic!("unexpected {other:?}"),
        };
        let names: Vec<_> = source_select.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ShopId", "Till"]);
        assert!(reads_only(where_select.predicate.as_ref().unwrap(), source_select));
    }

    #[test]
    fn test_distinct_is_never_pruned() {
        let query = QueryExpr::Distinct { source: session() };
        let projection = Binder::new().bind(&query).unwrap();
        let pruned = UnusedColumnPruning.apply(&projection).unwrap();
        assert_eq!(pruned.select.columns.len(), 8);
    }
}
