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

//! Partial evaluation.
//!
//! Every subtree that does not read a row parameter is evaluated once and
//! replaced by its value, so the binder only sees parameter-dependent nodes
//! and resolved literals. Subtrees that read a parameter are never evaluated.

use super::builder::QueryExpr;
use super::expr::{BinaryOp, Expr, Lambda, Method};
use super::{QueryError, QueryResult};
use dotrel_common::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Fold every lambda of an operator chain
pub fn fold_query(query: &QueryExpr) -> QueryResult<QueryExpr> {
    let folded = match query {
        QueryExpr::Source(entity) => QueryExpr::Source(entity.clone()),
        QueryExpr::Where { source, predicate } => QueryExpr::Where {
            source: fold_source(source)?,
            predicate: fold_lambda(predicate)?,
        },
        QueryExpr::Select { source, selector } => QueryExpr::Select {
            source: fold_source(source)?,
            selector: fold_lambda(selector)?,
        },
        QueryExpr::OrderBy { source, key, descending } => QueryExpr::OrderBy {
            source: fold_source(source)?,
            key: fold_lambda(key)?,
            descending: *descending,
        },
        QueryExpr::ThenBy { source, key, descending } => QueryExpr::ThenBy {
            source: fold_source(source)?,
            key: fold_lambda(key)?,
            descending: *descending,
        },
        QueryExpr::Join {
            kind,
            outer,
            inner,
            outer_key,
            inner_key,
            result,
        } => QueryExpr::Join {
            kind: *kind,
            outer: fold_source(outer)?,
            inner: fold_source(inner)?,
            outer_key: fold_lambda(outer_key)?,
            inner_key: fold_lambda(inner_key)?,
            result: fold_lambda(result)?,
        },
        QueryExpr::Distinct { source } => QueryExpr::Distinct { source: fold_source(source)? },
        QueryExpr::Take { source, count } => QueryExpr::Take {
            source: fold_source(source)?,
            count: *count,
        },
        QueryExpr::Aggregate { source, kind, selector } => QueryExpr::Aggregate {
            source: fold_source(source)?,
            kind: *kind,
            selector: selector.as_ref().map(fold_lambda).transpose()?,
        },
        QueryExpr::Call { source, operator, args } => QueryExpr::Call {
            source: fold_source(source)?,
            operator: operator.clone(),
            args: args.clone(),
        },
    };
    Ok(folded)
}

fn fold_source(source: &Arc<QueryExpr>) -> QueryResult<Arc<QueryExpr>> {
    fold_query(source).map(Arc::new)
}

fn fold_lambda(lambda: &Lambda) -> QueryResult<Lambda> {
    Ok(Lambda {
        params: lambda.params,
        body: fold(&lambda.body)?,
    })
}

/// Replace parameter-free subtrees of `expr` with constants
pub fn fold(expr: &Expr) -> QueryResult<Expr> {
    match expr {
        Expr::Param(_) => Ok(expr.clone()),
        Expr::Tuple(members) => members
            .iter()
            .map(|(name, e)| Ok((name.clone(), fold(e)?)))
            .collect::<QueryResult<Vec<_>>>()
            .map(Expr::Tuple),
        _ if !expr.references_param() => evaluate(expr).map(Expr::Constant),
        Expr::Member { target, name } => Ok(Expr::Member {
            target: Box::new(fold(target)?),
            name: name.clone(),
        }),
        Expr::Binary { op, left, right } => Ok(Expr::Binary {
            op: *op,
            left: Box::new(fold(left)?),
            right: Box::new(fold(right)?),
        }),
        Expr::Not(inner) => Ok(Expr::Not(Box::new(fold(inner)?))),
        Expr::Negate(inner) => Ok(Expr::Negate(Box::new(fold(inner)?))),
        Expr::Call { method, target, args } => Ok(Expr::Call {
            method: *method,
            target: Box::new(fold(target)?),
            args: args.iter().map(fold).collect::<QueryResult<Vec<_>>>()?,
        }),
        Expr::Conditional { test, then, otherwise } => Ok(Expr::Conditional {
            test: Box::new(fold(test)?),
            then: Box::new(fold(then)?),
            otherwise: Box::new(fold(otherwise)?),
        }),
        Expr::Constant(_) | Expr::Local(_) => Err(QueryError::Invariant("constant reported as parameter dependent".to_string())),
    }
}

/// Evaluate a parameter-free expression
pub fn evaluate(expr: &Expr) -> QueryResult<Value> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),
        Expr::Local(captured) => Ok(captured.value()),
        Expr::Param(index) => Err(QueryError::Invariant(format!("parameter {index} cannot be evaluated"))),
        Expr::Member { name, .. } => Err(QueryError::Unsupported(format!("member '{name}' of a constant"))),
        Expr::Tuple(_) => Err(QueryError::Unsupported("tuple used as a value".to_string())),
        Expr::Not(inner) => Ok(evaluate(inner)?.not()?),
        Expr::Negate(inner) => Ok(evaluate(inner)?.negate()?),
        Expr::Conditional { test, then, otherwise } => {
            if evaluate(test)?.as_bool()? {
                evaluate(then)
            } else {
                evaluate(otherwise)
            }
        }
        Expr::Binary { op, left, right } => binary(*op, &evaluate(left)?, &evaluate(right)?),
        Expr::Call { method, target, args } => {
            let target = evaluate(target)?;
            let args = args.iter().map(evaluate).collect::<QueryResult<Vec<_>>>()?;
            call(*method, &target, &args)
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> QueryResult<Value> {
    let ordered = |accept: fn(Ordering) -> bool| Value::Bool(left.compare(right).is_some_and(accept));
    let value = match op {
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::Lt => ordered(Ordering::is_lt),
        BinaryOp::Le => ordered(Ordering::is_le),
        BinaryOp::Gt => ordered(Ordering::is_gt),
        BinaryOp::Ge => ordered(Ordering::is_ge),
        BinaryOp::And => Value::Bool(left.as_bool()? && right.as_bool()?),
        BinaryOp::Or => Value::Bool(left.as_bool()? || right.as_bool()?),
        BinaryOp::Add => left.add(right)?,
        BinaryOp::Sub => left.arithmetic("sub", right)?,
        BinaryOp::Mul => left.arithmetic("mul", right)?,
        BinaryOp::Div => left.arithmetic("div", right)?,
        BinaryOp::Mod => left.arithmetic("mod", right)?,
    };
    Ok(value)
}

fn call(method: Method, target: &Value, args: &[Value]) -> QueryResult<Value> {
    let argument = || {
        args.first()
            .ok_or_else(|| QueryError::Unsupported(format!("{method:?} without an argument")))
    };
    let value = match method {
        Method::Contains => match target {
            Value::List(items) => {
                let needle = argument()?;
                Value::Bool(items.iter().any(|item| item.loose_eq(needle)))
            }
            other => Value::Bool(other.as_str()?.contains(argument()?.as_str()?)),
        },
        Method::StartsWith => Value::Bool(target.as_str()?.starts_with(argument()?.as_str()?)),
        Method::EndsWith => Value::Bool(target.as_str()?.ends_with(argument()?.as_str()?)),
        Method::ToUpper => Value::Text(target.as_str()?.to_uppercase()),
        Method::ToLower => Value::Text(target.as_str()?.to_lowercase()),
        Method::Trim => Value::Text(target.as_str()?.trim().to_string()),
    };
    Ok(value)
}
