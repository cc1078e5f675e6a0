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

//! Passes collapsing the nested selects produced by successive operators.

use super::OptimizerPass;
use crate::query::ir::{Alias, ColumnRef, ProjectionExpr, Select, Source, SqlExpr};
use crate::query::{QueryError, QueryResult};
use std::collections::HashMap;

/// Replaces subqueries that only pass their source's columns through with
/// that source itself.
pub struct RedundantSubqueryRemoval;

impl OptimizerPass for RedundantSubqueryRemoval {
    fn name(&self) -> &str {
        "RedundantSubqueryRemoval"
    }

    fn apply(&self, projection: &ProjectionExpr) -> QueryResult<ProjectionExpr> {
        let mut projection = projection.clone();
        let mut remap = HashMap::new();
        remove_redundant(&mut projection.select, &mut remap);

        // the top select may go too, when it repeats its source exactly
        if let Some(inner) = exact_pass_through(&projection.select) {
            remap.insert(projection.select.alias, inner.alias);
            projection.select = inner;
        }
        projection.shape.realias(&remap);
        Ok(projection)
    }
}

fn is_redundant(select: &Select) -> bool {
    select.predicate.is_none()
        && select.order_by.is_empty()
        && !select.has_row_modifiers()
        && select.from.alias().is_some_and(|alias| select.is_pass_through_of(alias))
}

fn exact_pass_through(select: &Select) -> Option<Select> {
    match &select.from {
        Source::Select(inner)
            if is_redundant(select)
                && inner.columns.len() == select.columns.len()
                && inner.columns.iter().zip(&select.columns).all(|(a, b)| a.name == b.name) =>
        {
            Some((**inner).clone())
        }
        _ => None,
    }
}

fn remove_redundant(select: &mut Select, remap: &mut HashMap<Alias, Alias>) {
    replace_in_source(&mut select.from, remap);
    if !remap.is_empty() {
        select.rewrite_own_columns(&mut |c| remap.get(&c.alias).map(|to| SqlExpr::column(*to, c.name.clone(), c.ty)));
    }
}

fn replace_in_source(source: &mut Source, remap: &mut HashMap<Alias, Alias>) {
    match source {
        Source::Table(_) => {}
        Source::Join(join) => {
            replace_in_source(&mut join.left, remap);
            replace_in_source(&mut join.right, remap);
        }
        Source::Select(child) => {
            remove_redundant(child, remap);
            if !is_redundant(child) {
                return;
            }
            if let Some(inner_alias) = child.from.alias() {
                remap.insert(child.alias, inner_alias);
                let replacement = child.from.clone();
                *source = replacement;
            }
        }
    }
}

/// Folds a select into its parent when the select neither limits, dedupes
/// nor aggregates its rows. Predicates combine as `inner AND outer` and the
/// parent's columns are rewritten over the inner select's source.
pub struct SubqueryMerge;

impl OptimizerPass for SubqueryMerge {
    fn name(&self) -> &str {
        "SubqueryMerge"
    }

    fn apply(&self, projection: &ProjectionExpr) -> QueryResult<ProjectionExpr> {
        let mut projection = projection.clone();
        merge(&mut projection.select)?;
        Ok(projection)
    }
}

fn merge(select: &mut Select) -> QueryResult<()> {
    for child in select.from.selects_mut() {
        merge(child)?;
    }

    while let Source::Select(inner) = &select.from {
        if inner.has_row_modifiers() {
            break;
        }
        let inner: Select = (**inner).clone();

        let mut missing: Option<String> = None;
        let mut inline = |c: &ColumnRef| {
            if c.alias != inner.alias {
                return None;
            }
            match inner.column(&c.name) {
                Some(decl) => Some(decl.expr.clone()),
                None => {
                    missing = Some(c.name.clone());
                    None
                }
            }
        };
        select.rewrite_own_columns(&mut inline);
        if let Some(name) = missing {
            return Err(QueryError::Invariant(format!("column {name} is not produced by t{}", inner.alias)));
        }

        select.predicate = SqlExpr::and_also(inner.predicate, select.predicate.take());
        if select.order_by.is_empty() && !select.is_aggregate() {
            select.order_by = inner.order_by;
        }
        select.from = inner.from;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnType, EntityDescriptor};
    use crate::query::binder::Binder;
    use crate::query::builder::{JoinKind, QueryExpr};
    use crate::query::expr::{field, param, tuple, BinaryOp, Lambda};
    use dotrel_common::Value;
    use std::sync::Arc;

    fn session() -> Arc<QueryExpr> {
        Arc::new(QueryExpr::Source(Arc::new(
            EntityDescriptor::new("Session").promote("ShopId", ColumnType::Int).promote("Status", ColumnType::Enum),
        )))
    }

    fn filtered(source: Arc<QueryExpr>, column: &str, value: i64) -> Arc<QueryExpr> {
        Arc::new(QueryExpr::Where {
            source,
            predicate: Lambda::unary(field(column).eq(value)),
        })
    }

    #[test]
    fn test_pass_through_over_table_is_removed() {
        let projection = Binder::new().bind(&filtered(session(), "ShopId", 1)).unwrap();
        let removed = RedundantSubqueryRemoval.apply(&projection).unwrap();
        assert!(matches!(&removed.select.from, Source::Table(t) if t.alias == 0));
        assert_eq!(
            removed.select.predicate,
            Some(SqlExpr::binary(BinaryOp::Eq, SqlExpr::column(0, "ShopId", Some(ColumnType::Int)), SqlExpr::Literal(Value::Int(1))))
        );
    }

    #[test]
    fn test_top_exact_pass_through_is_replaced() {
        let query = Arc::new(QueryExpr::Select {
            source: filtered(session(), "ShopId", 1),
            selector: Lambda::unary(param(0)),
        });
        let projection = Binder::new().bind(&query).unwrap();
        assert_eq!(projection.select.alias, 3);
        let removed = RedundantSubqueryRemoval.apply(&projection).unwrap();
        assert_eq!(removed.select.alias, 2);
        assert!(removed.select.predicate.is_some());
    }

    #[test]
    fn test_chained_filters_merge_inner_first() {
        let query = filtered(filtered(filtered(session(), "ShopId", 1), "ShopId", 2), "ShopId", 3);
        let projection = Binder::new().bind(&query).unwrap();
        let removed = RedundantSubqueryRemoval.apply(&projection).unwrap();
        let merged = SubqueryMerge.apply(&removed).unwrap();

        assert!(matches!(merged.select.from, Source::Table(_)));
        let term = |v: i64| SqlExpr::binary(BinaryOp::Eq, SqlExpr::column(0, "ShopId", Some(ColumnType::Int)), SqlExpr::Literal(Value::Int(v)));
        let expected = SqlExpr::binary(BinaryOp::And, SqlExpr::binary(BinaryOp::And, term(1), term(2)), term(3));
        assert_eq!(merged.select.predicate, Some(expected));
    }

    #[test]
    fn test_limited_subquery_is_not_merged() {
        let query = filtered(Arc::new(QueryExpr::Take { source: session(), count: 3 }), "ShopId", 1);
        let projection = Binder::new().bind(&query).unwrap();
        let merged = SubqueryMerge.apply(&RedundantSubqueryRemoval.apply(&projection).unwrap()).unwrap();
        match &merged.select.from {
            Source::Select(inner) => assert_eq!(inner.take, Some(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_join_sides_collapse_to_tables() {
        let shop = Arc::new(QueryExpr::Source(Arc::new(EntityDescriptor::new("Shop"))));
        let query = QueryExpr::Join {
            kind: JoinKind::LeftOuter,
            outer: session(),
            inner: shop,
            outer_key: Lambda::unary(field("ShopId")),
            inner_key: Lambda::unary(field("ShopId")),
            result: Lambda::binary(tuple([("Session", param(0)), ("Shop", param(1))])),
        };
        let projection = Binder::new().bind(&query).unwrap();
        let removed = RedundantSubqueryRemoval.apply(&projection).unwrap();
        match &removed.select.from {
            Source::Join(join) => {
                assert!(matches!(join.left, Source::Table(_)));
                assert!(matches!(join.right, Source::Table(_)));
                let mut aliases = Vec::new();
                join.condition.visit_columns(&mut |c| aliases.push(c.alias));
                assert_eq!(aliases, vec![0, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
