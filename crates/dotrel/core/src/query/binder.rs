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

//! Binding of query operators to relational IR.
//!
//! Only the recognized operator set is translated. Each operator wraps the
//! projection produced by its source in a new select; the optimizer later
//! collapses the resulting chains.

use super::builder::{AggregateKind, QueryExpr};
use super::expr::{BinaryOp, Expr, Lambda, Method};
use super::ir::{Alias, ColumnDecl, Join, LikeKind, OrderKey, ProjectionExpr, Select, Shape, Source, SqlExpr, SqlFunction, TableRef, unique_name};
use super::{QueryError, QueryResult};
use crate::entity::EntityDescriptor;
use dotrel_common::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub struct Binder {
    next_alias: Alias,
}

impl Binder {
    pub fn new() -> Self {
        Self { next_alias: 0 }
    }

    pub fn bind(&mut self, query: &QueryExpr) -> QueryResult<ProjectionExpr> {
        match query {
            QueryExpr::Source(entity) => Ok(self.bind_source(entity)),
            QueryExpr::Where { source, predicate } => {
                let projection = self.bind(source)?;
                let predicate = self.translate(&predicate.body, &[&projection.shape], predicate)?;
                let mut wrapped = self.wrap(projection.select, &projection.shape);
                wrapped.select.predicate = Some(predicate);
                Ok(wrapped)
            }
            QueryExpr::Select { source, selector } => {
                let projection = self.bind(source)?;
                let shape = self.translate_shape(&selector.body, &[&projection.shape], selector)?;
                Ok(self.wrap(projection.select, &shape))
            }
            QueryExpr::OrderBy { .. } | QueryExpr::ThenBy { .. } => {
                let (projection, keys) = self.bind_ordering(query)?;
                let mut wrapped = self.wrap(projection.select, &projection.shape);
                wrapped.select.order_by = keys;
                Ok(wrapped)
            }
            QueryExpr::Join {
                kind,
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let outer = self.bind(outer)?;
                let inner = self.bind(inner)?;
                let left = self.translate(&outer_key.body, &[&outer.shape], outer_key)?;
                let right = self.translate(&inner_key.body, &[&inner.shape], inner_key)?;
                let shape = self.translate_shape(&result.body, &[&outer.shape, &inner.shape], result)?;
                let from = Source::Join(Box::new(Join {
                    kind: *kind,
                    left: Source::Select(Box::new(outer.select)),
                    right: Source::Select(Box::new(inner.select)),
                    condition: SqlExpr::binary(BinaryOp::Eq, left, right),
                }));
                Ok(self.project(from, &shape))
            }
            QueryExpr::Distinct { source } => {
                let projection = self.bind(source)?;
                let mut wrapped = self.wrap(projection.select, &projection.shape);
                wrapped.select.distinct = true;
                Ok(wrapped)
            }
            QueryExpr::Take { source, count } => {
                let projection = self.bind(source)?;
                let mut wrapped = self.wrap(projection.select, &projection.shape);
                wrapped.select.take = Some(*count);
                Ok(wrapped)
            }
            QueryExpr::Aggregate { source, kind, selector } => {
                let projection = self.bind(source)?;
                let arg = match (selector, &projection.shape) {
                    (Some(selector), shape) => Some(self.translate(&selector.body, &[shape], selector)?),
                    (None, _) if *kind == AggregateKind::Count => None,
                    (None, Shape::Scalar(expr)) => Some(expr.clone()),
                    (None, shape) => {
                        return Err(QueryError::AmbiguousAggregate(format!("{kind} over {} needs a selector", shape.describe())));
                    }
                };
                let alias = self.alias();
                let aggregate = SqlExpr::Aggregate {
                    kind: *kind,
                    arg: arg.map(Box::new),
                };
                let ty = aggregate.column_type();
                let select = Select::new(alias, vec![ColumnDecl::new("agg", aggregate)], Source::Select(Box::new(projection.select)));
                Ok(ProjectionExpr {
                    select,
                    shape: Shape::Scalar(SqlExpr::column(alias, "agg", ty)),
                })
            }
            QueryExpr::Call { operator, .. } => Err(QueryError::Unsupported(format!("query operator '{operator}'"))),
        }
    }

    fn alias(&mut self) -> Alias {
        let alias = self.next_alias;
        self.next_alias += 1;
        alias
    }

    fn bind_source(&mut self, entity: &Arc<EntityDescriptor>) -> ProjectionExpr {
        let table = self.alias();
        let shape = Shape::Entity {
            entity: entity.clone(),
            columns: entity
                .columns()
                .iter()
                .map(|c| (c.name.clone(), SqlExpr::column(table, c.name.clone(), Some(c.ty))))
                .collect(),
        };
        let from = Source::Table(TableRef {
            alias: table,
            entity: entity.clone(),
        });
        self.project(from, &shape)
    }

    /// Ordering chain below an `OrderBy`/`ThenBy`, keys in primary to secondary order
    fn bind_ordering(&mut self, query: &QueryExpr) -> QueryResult<(ProjectionExpr, Vec<OrderKey>)> {
        match query {
            QueryExpr::OrderBy { source, key, descending } => {
                let projection = self.bind(source)?;
                let expr = self.translate(&key.body, &[&projection.shape], key)?;
                Ok((projection, vec![OrderKey { expr, descending: *descending }]))
            }
            QueryExpr::ThenBy { source, key, descending } => match source.as_ref() {
                QueryExpr::OrderBy { .. } | QueryExpr::ThenBy { .. } => {
                    let (projection, mut keys) = self.bind_ordering(source)?;
                    let expr = self.translate(&key.body, &[&projection.shape], key)?;
                    keys.push(OrderKey { expr, descending: *descending });
                    Ok((projection, keys))
                }
                other => Err(QueryError::Unsupported(format!("ThenBy after {}", other.operator_name()))),
            },
            other => Err(QueryError::Invariant(format!("{} is not an ordering", other.operator_name()))),
        }
    }

    /// New select over `inner` exposing the leaves of `shape`
    fn wrap(&mut self, inner: Select, shape: &Shape) -> ProjectionExpr {
        self.project(Source::Select(Box::new(inner)), shape)
    }

    fn project(&mut self, from: Source, shape: &Shape) -> ProjectionExpr {
        let alias = self.alias();
        let mut columns: Vec<ColumnDecl> = Vec::new();
        let mut names = shape.leaves().into_iter();
        let shape = shape.map_leaves(&mut |expr| {
            let hint = names.next().map(|(hint, _)| hint.to_string()).unwrap_or_else(|| "value".to_string());
            let taken: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            let name = unique_name(&hint, &taken);
            columns.push(ColumnDecl::new(name.clone(), expr.clone()));
            SqlExpr::column(alias, name, expr.column_type())
        });
        ProjectionExpr {
            select: Select::new(alias, columns, from),
            shape,
        }
    }

    fn translate_shape(&self, expr: &Expr, scope: &[&Shape], lambda: &Lambda) -> QueryResult<Shape> {
        match expr {
            Expr::Param(index) => scope
                .get(*index)
                .filter(|_| *index < lambda.params)
                .map(|shape| (*shape).clone())
                .ok_or_else(|| QueryError::Invariant(format!("parameter {index} is not in scope"))),
            Expr::Member { target, name } => {
                let target = self.translate_shape(target, scope, lambda)?;
                target.member(name).ok_or_else(|| QueryError::UnknownMember {
                    target: target.describe(),
                    member: name.clone(),
                })
            }
            Expr::Tuple(members) => members
                .iter()
                .map(|(name, member)| Ok((name.clone(), self.translate_shape(member, scope, lambda)?)))
                .collect::<QueryResult<Vec<_>>>()
                .map(Shape::Tuple),
            other => self.translate(other, scope, lambda).map(Shape::Scalar),
        }
    }

    fn translate(&self, expr: &Expr, scope: &[&Shape], lambda: &Lambda) -> QueryResult<SqlExpr> {
        let sql = |e: &Expr| self.translate(e, scope, lambda).map(Box::new);
        match expr {
            Expr::Param(_) | Expr::Member { .. } => match self.translate_shape(expr, scope, lambda)? {
                Shape::Scalar(sql) => Ok(sql),
                other => Err(QueryError::Unsupported(format!("{} used as a value", other.describe()))),
            },
            Expr::Constant(value) => Ok(SqlExpr::Literal(value.clone())),
            Expr::Local(captured) => Ok(SqlExpr::Literal(captured.value())),
            Expr::Binary { op, left, right } => Ok(SqlExpr::Binary {
                op: *op,
                left: sql(left)?,
                right: sql(right)?,
            }),
            Expr::Not(inner) => Ok(SqlExpr::Not(sql(inner)?)),
            Expr::Negate(inner) => Ok(SqlExpr::Negate(sql(inner)?)),
            Expr::Conditional { test, then, otherwise } => Ok(SqlExpr::Case {
                test: sql(test)?,
                then: sql(then)?,
                otherwise: sql(otherwise)?,
            }),
            Expr::Call { method, target, args } => {
                let single = || match args.as_slice() {
                    [arg] => Ok(arg),
                    _ => Err(QueryError::Unsupported(format!("{method:?} takes one argument, got {}", args.len()))),
                };
                let like = |kind| -> QueryResult<SqlExpr> {
                    Ok(SqlExpr::Like {
                        expr: sql(target)?,
                        kind,
                        pattern: sql(single()?)?,
                    })
                };
                let function = |function| -> QueryResult<SqlExpr> { Ok(SqlExpr::Function { function, arg: sql(target)? }) };
                match method {
                    Method::Contains => match target.as_ref() {
                        // collection.contains(column) is column-in-collection
                        Expr::Constant(Value::List(values)) => Ok(SqlExpr::In {
                            expr: sql(single()?)?,
                            values: values.clone(),
                        }),
                        _ => like(LikeKind::Contains),
                    },
                    Method::StartsWith => like(LikeKind::StartsWith),
                    Method::EndsWith => like(LikeKind::EndsWith),
                    Method::ToUpper => function(SqlFunction::Upper),
                    Method::ToLower => function(SqlFunction::Lower),
                    Method::Trim => function(SqlFunction::Trim),
                }
            }
            Expr::Tuple(_) => Err(QueryError::Unsupported("tuple used as a value".to_string())),
        }
    }
}

impl Default for Binder {
    fn default() -> Self {
        Self::new()
    }
}
