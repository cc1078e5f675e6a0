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

//! Immutable query builders.

use super::expr::{field, Expr, Lambda};
use crate::entity::{Entity, EntityDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    pub fn function_name(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Average => "AVG",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// Operator chain of a query. Each operator owns its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpr {
    Source(Arc<EntityDescriptor>),
    Where {
        source: Arc<QueryExpr>,
        predicate: Lambda,
    },
    Select {
        source: Arc<QueryExpr>,
        selector: Lambda,
    },
    OrderBy {
        source: Arc<QueryExpr>,
        key: Lambda,
        descending: bool,
    },
    ThenBy {
        source: Arc<QueryExpr>,
        key: Lambda,
        descending: bool,
    },
    Join {
        kind: JoinKind,
        outer: Arc<QueryExpr>,
        inner: Arc<QueryExpr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    Distinct {
        source: Arc<QueryExpr>,
    },
    Take {
        source: Arc<QueryExpr>,
        count: u64,
    },
    Aggregate {
        source: Arc<QueryExpr>,
        kind: AggregateKind,
        selector: Option<Lambda>,
    },
    /// Any other operator; kept so it can be reported, never translated
    Call {
        source: Arc<QueryExpr>,
        operator: String,
        args: Vec<Expr>,
    },
}

impl QueryExpr {
    pub fn operator_name(&self) -> &str {
        match self {
            QueryExpr::Source(_) => "Source",
            QueryExpr::Where { .. } => "Where",
            QueryExpr::Select { .. } => "Select",
            QueryExpr::OrderBy { .. } => "OrderBy",
            QueryExpr::ThenBy { .. } => "ThenBy",
            QueryExpr::Join { .. } => "Join",
            QueryExpr::Distinct { .. } => "Distinct",
            QueryExpr::Take { .. } => "Take",
            QueryExpr::Aggregate { .. } => "Aggregate",
            QueryExpr::Call { operator, .. } => operator,
        }
    }

    /// Entity at the root of the leftmost source chain
    pub fn root_entity(&self) -> &Arc<EntityDescriptor> {
        match self {
            QueryExpr::Source(entity) => entity,
            QueryExpr::Join { outer, .. } => outer.root_entity(),
            QueryExpr::Where { source, .. }
            | QueryExpr::Select { source, .. }
            | QueryExpr::OrderBy { source, .. }
            | QueryExpr::ThenBy { source, .. }
            | QueryExpr::Distinct { source }
            | QueryExpr::Take { source, .. }
            | QueryExpr::Aggregate { source, .. }
            | QueryExpr::Call { source, .. } => source.root_entity(),
        }
    }

    /// Ordering operators are removed; used for count queries
    pub fn without_ordering(&self) -> QueryExpr {
        match self {
            QueryExpr::OrderBy { source, .. } | QueryExpr::ThenBy { source, .. } => source.without_ordering(),
            QueryExpr::Where { source, predicate } => QueryExpr::Where {
                source: Arc::new(source.without_ordering()),
                predicate: predicate.clone(),
            },
            QueryExpr::Select { source, selector } => QueryExpr::Select {
                source: Arc::new(source.without_ordering()),
                selector: selector.clone(),
            },
            QueryExpr::Distinct { source } => QueryExpr::Distinct {
                source: Arc::new(source.without_ordering()),
            },
            // ordering below a take or join decides which rows survive
            other => other.clone(),
        }
    }
}

/// Typed, immutable query over entity `E`.
///
/// Every operator returns a new query sharing the tree built so far, so a
/// base query can be refined in several directions without aliasing.
pub struct Query<E> {
    expr: Arc<QueryExpr>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self::from_expr(self.expr.clone())
    }
}

impl<E> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("expr", &self.expr).finish()
    }
}

impl<E: Entity> Query<E> {
    pub fn new() -> Self {
        Self::from_expr(Arc::new(QueryExpr::Source(E::descriptor())))
    }
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Query<E> {
    pub fn from_expr(expr: Arc<QueryExpr>) -> Self {
        Self {
            expr,
            _entity: PhantomData,
        }
    }

    pub fn expr(&self) -> &Arc<QueryExpr> {
        &self.expr
    }

    fn chain(&self, expr: QueryExpr) -> Self {
        Self::from_expr(Arc::new(expr))
    }

    pub fn filter(&self, predicate: Expr) -> Self {
        self.chain(QueryExpr::Where {
            source: self.expr.clone(),
            predicate: Lambda::unary(predicate),
        })
    }

    pub fn select(&self, selector: Expr) -> Self {
        self.chain(QueryExpr::Select {
            source: self.expr.clone(),
            selector: Lambda::unary(selector),
        })
    }

    fn ordered(&self, key: Expr, descending: bool, then: bool) -> Self {
        let source = self.expr.clone();
        let key = Lambda::unary(key);
        self.chain(if then {
            QueryExpr::ThenBy { source, key, descending }
        } else {
            QueryExpr::OrderBy { source, key, descending }
        })
    }

    pub fn order_by(&self, key: Expr) -> Self {
        self.ordered(key, false, false)
    }

    pub fn order_by_descending(&self, key: Expr) -> Self {
        self.ordered(key, true, false)
    }

    pub fn then_by(&self, key: Expr) -> Self {
        self.ordered(key, false, true)
    }

    pub fn then_by_descending(&self, key: Expr) -> Self {
        self.ordered(key, true, true)
    }

    /// Join with `inner` on key equality. The result selector sees the outer
    /// row as `param(0)` and the inner row as `param(1)`.
    pub fn join<I>(&self, inner: &Query<I>, kind: JoinKind, outer_key: Expr, inner_key: Expr, result: Expr) -> Self {
        self.chain(QueryExpr::Join {
            kind,
            outer: self.expr.clone(),
            inner: inner.expr.clone(),
            outer_key: Lambda::unary(outer_key),
            inner_key: Lambda::unary(inner_key),
            result: Lambda::binary(result),
        })
    }

    pub fn distinct(&self) -> Self {
        self.chain(QueryExpr::Distinct { source: self.expr.clone() })
    }

    pub fn take(&self, count: u64) -> Self {
        self.chain(QueryExpr::Take {
            source: self.expr.clone(),
            count,
        })
    }

    pub fn aggregate(&self, kind: AggregateKind, selector: Option<Expr>) -> Self {
        self.chain(QueryExpr::Aggregate {
            source: self.expr.clone(),
            kind,
            selector: selector.map(Lambda::unary),
        })
    }

    pub fn count(&self) -> Self {
        self.aggregate(AggregateKind::Count, None)
    }

    /// Operator outside the supported set; compiling it fails
    pub fn call(&self, operator: impl Into<String>, args: Vec<Expr>) -> Self {
        self.chain(QueryExpr::Call {
            source: self.expr.clone(),
            operator: operator.into(),
            args,
        })
    }
}

/// Accumulator form used by lighter-weight call sites: predicates ANDed in
/// declaration order and `(column, descending)` ordering pairs.
pub struct SimpleQuery<E> {
    predicates: Vec<Expr>,
    ordering: Vec<(String, bool)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for SimpleQuery<E> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
            ordering: self.ordering.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for SimpleQuery<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleQuery")
            .field("predicates", &self.predicates)
            .field("ordering", &self.ordering)
            .finish()
    }
}

impl<E> Default for SimpleQuery<E> {
    fn default() -> Self {
        Self {
            predicates: Vec::new(),
            ordering: Vec::new(),
            _entity: PhantomData,
        }
    }
}

impl<E> SimpleQuery<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self, predicate: Expr) -> Self {
        let mut next = self.clone();
        next.predicates.push(predicate);
        next
    }

    pub fn order_by(&self, column: impl Into<String>, descending: bool) -> Self {
        let mut next = self.clone();
        next.ordering.push((column.into(), descending));
        next
    }

    pub fn predicates(&self) -> &[Expr] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[(String, bool)] {
        &self.ordering
    }
}

impl<E: Entity> SimpleQuery<E> {
    /// Lower into the operator chain: one `Where` per predicate, then the ordering
    pub fn to_query(&self) -> Query<E> {
        let mut query = self.predicates.iter().fold(Query::<E>::new(), |q, p| q.filter(p.clone()));
        for (index, (column, descending)) in self.ordering.iter().enumerate() {
            query = query.ordered(field(column.as_str()), *descending, index > 0);
        }
        query
    }
}

impl<E: Entity> From<&SimpleQuery<E>> for Query<E> {
    fn from(simple: &SimpleQuery<E>) -> Self {
        simple.to_query()
    }
}
