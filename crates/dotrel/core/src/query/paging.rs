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

//! Paging translation.
//!
//! The dialect only pages an ordered select, so a page request guarantees a
//! single top-level ordering: the query's own, the ordering of a limited
//! subquery it wraps, or the identity column of the leftmost table. An
//! unordered `DISTINCT` select is ordered by its own columns.

use super::ir::{ColumnDecl, OrderKey, Paging, ProjectionExpr, Select, Source, SqlExpr};
use super::optimizer::order_by::lift;
use super::{QueryError, QueryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    /// Pages are numbered from 1
    pub fn new(page: u64, size: u64) -> QueryResult<Self> {
        let request = Self { page, size };
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.page == 0 {
            return Err(QueryError::InvalidPaging(format!("page must be at least 1, got {}", self.page)));
        }
        if self.size == 0 {
            return Err(QueryError::InvalidPaging(format!("page size must be at least 1, got {}", self.size)));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.size)
    }
}

/// Append `OFFSET`/`FETCH` to the top select
pub fn apply_paging(projection: ProjectionExpr, request: PageRequest) -> QueryResult<ProjectionExpr> {
    request.validate()?;

    let mut projection = if projection.select.take.is_some() || projection.select.paging.is_some() || projection.select.is_aggregate() {
        projection.wrapped()
    } else {
        projection
    };

    if projection.select.order_by.is_empty() {
        projection.select.order_by = default_ordering(&mut projection.select)?;
    }
    projection.select.paging = Some(Paging {
        offset: request.offset(),
        fetch: request.size,
    });
    Ok(expose_ordering(projection))
}

fn default_ordering(select: &mut Select) -> QueryResult<Vec<OrderKey>> {
    if select.distinct {
        if select.columns.is_empty() {
            return Err(QueryError::Invariant("distinct select without columns".to_string()));
        }
        return Ok(select
            .columns
            .iter()
            .map(|c| OrderKey {
                expr: c.expr.clone(),
                descending: false,
            })
            .collect());
    }

    if let Source::Select(child) = &mut select.from
        && !child.order_by.is_empty()
    {
        let keys: Vec<OrderKey> = child.order_by.clone();
        let lifted: Option<Vec<OrderKey>> = keys
            .into_iter()
            .map(|key| {
                lift(child, &key.expr).map(|expr| OrderKey {
                    expr,
                    descending: key.descending,
                })
            })
            .collect();
        if let Some(lifted) = lifted {
            return Ok(lifted);
        }
    }

    let expr = identity_key(&mut select.from).ok_or_else(|| QueryError::Invariant("no table to derive a default ordering from".to_string()))?;
    Ok(vec![OrderKey { expr, descending: false }])
}

/// Identity column of the leftmost table, exposed up to `source`'s scope
fn identity_key(source: &mut Source) -> Option<SqlExpr> {
    match source {
        Source::Table(table) => {
            let id = table.entity.id_column();
            Some(SqlExpr::column(table.alias, id.name.clone(), Some(id.ty)))
        }
        Source::Join(join) => identity_key(&mut join.left),
        Source::Select(child) => {
            let inner = identity_key(&mut child.from)?;
            // distinct or aggregated rows have no identity; their first column stands in
            lift(child, &inner).or_else(|| {
                let first = child.columns.first()?.name.clone();
                child.output_ref(&first)
            })
        }
    }
}

/// A `DISTINCT` select ordered by something it does not project is moved
/// into a subquery that also projects the ordering keys; the outer select
/// restores the original columns and carries the ordering and paging.
pub fn expose_ordering(projection: ProjectionExpr) -> ProjectionExpr {
    let select = &projection.select;
    let hidden = select.distinct && select.order_by.iter().any(|k| !select.columns.iter().any(|c| c.expr == k.expr));
    if !hidden {
        return projection;
    }

    let ProjectionExpr { select: mut inner, mut shape } = projection;
    let inner_alias = inner.alias;
    let columns: Vec<ColumnDecl> = inner
        .columns
        .iter()
        .map(|c| ColumnDecl::new(c.name.clone(), SqlExpr::column(inner_alias, c.name.clone(), c.expr.column_type())))
        .collect();

    let order_by = if inner.take.is_some() {
        inner.order_by.clone()
    } else {
        std::mem::take(&mut inner.order_by)
    };
    let order_by: Vec<OrderKey> = order_by
        .into_iter()
        .map(|key| {
            let name = inner.ensure_column(&key.expr);
            OrderKey {
                expr: SqlExpr::column(inner_alias, name, key.expr.column_type()),
                descending: key.descending,
            }
        })
        .collect();
    let paging = inner.paging.take();

    let alias = inner.max_alias() + 1;
    let mut outer = Select::new(alias, columns, Source::Select(Box::new(inner)));
    outer.order_by = order_by;
    outer.paging = paging;
    shape.realias(&HashMap::from([(inner_alias, alias)]));
    ProjectionExpr { select: outer, shape }
}
