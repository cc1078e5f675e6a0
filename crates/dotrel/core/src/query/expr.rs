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

//! Query expression model.
//!
//! Predicates, ordering keys and projections are written as small
//! expression trees over the lambda parameters of the query operator they
//! belong to. `Param(0)` is the row of the operator's source; a join result
//! selector sees the outer row as `Param(0)` and the inner row as `Param(1)`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use dotrel_common::{EnumValue, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison() && !self.is_logical()
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// Methods callable inside an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Substring test on text, membership test on a collection
    Contains,
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Trim,
}

/// Value captured from the caller's scope, read when the query is compiled
#[derive(Clone)]
pub struct Captured {
    name: String,
    producer: Arc<dyn Fn() -> Value + Send + Sync>,
}

impl Captured {
    pub fn new(name: impl Into<String>, producer: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            producer: Arc::new(producer),
        }
    }

    pub fn constant(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, move || value.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Value {
        (self.producer)()
    }
}

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Captured({})", self.name)
    }
}

impl PartialEq for Captured {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.producer, &other.producer)
    }
}

#[derive(Serialize, Deserialize)]
struct CapturedRepr {
    name: String,
    value: Value,
}

impl Serialize for Captured {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CapturedRepr {
            name: self.name.clone(),
            value: self.value(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Captured {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = CapturedRepr::deserialize(deserializer)?;
        Ok(Captured::constant(repr.name, repr.value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Param(usize),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Constant(Value),
    Local(Captured),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negate(Box<Expr>),
    Call {
        method: Method,
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Named members of a projected row
    Tuple(Vec<(String, Expr)>),
}

/// Body of a query operator together with the number of row parameters it sees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: usize,
    pub body: Expr,
}

impl Lambda {
    pub fn unary(body: Expr) -> Self {
        Self { params: 1, body }
    }

    pub fn binary(body: Expr) -> Self {
        Self { params: 2, body }
    }
}

/// Row parameter `index` of the enclosing lambda
pub fn param(index: usize) -> Expr {
    Expr::Param(index)
}

/// Column `name` of the operator's source row
pub fn field(name: impl Into<String>) -> Expr {
    param(0).member(name)
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

/// Captured local, read at compile time
pub fn local(name: impl Into<String>, producer: impl Fn() -> Value + Send + Sync + 'static) -> Expr {
    Expr::Local(Captured::new(name, producer))
}

pub fn tuple<N: Into<String>>(members: impl IntoIterator<Item = (N, Expr)>) -> Expr {
    Expr::Tuple(members.into_iter().map(|(n, e)| (n.into(), e)).collect())
}

/// Conversion into an expression operand
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

macro_rules! value_operands {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::Constant(Value::from(self))
                }
            }
        )*
    };
}

value_operands!(
    Value,
    bool,
    i32,
    i64,
    u32,
    f64,
    &str,
    String,
    EnumValue,
    NaiveDate,
    NaiveDateTime,
    DateTime<FixedOffset>,
    Uuid,
    Option<i64>,
    Option<String>,
    Vec<i64>,
    Vec<Option<i64>>,
    Vec<String>,
    Vec<&str>,
    Vec<EnumValue>,
    Vec<Value>,
);

impl Expr {
    pub fn member(self, name: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    fn binary(self, op: BinaryOp, right: impl IntoExpr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into_expr()),
        }
    }

    pub fn eq(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn ne(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ne, right)
    }

    pub fn lt(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn le(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Le, right)
    }

    pub fn gt(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn ge(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Ge, right)
    }

    pub fn and(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn plus(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    pub fn minus(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Sub, right)
    }

    pub fn times(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Mul, right)
    }

    pub fn divided_by(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Div, right)
    }

    pub fn modulo(self, right: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Mod, right)
    }

    pub fn negate(self) -> Expr {
        Expr::Negate(Box::new(self))
    }

    pub fn is_null(self) -> Expr {
        self.eq(Value::Null)
    }

    pub fn is_not_null(self) -> Expr {
        self.ne(Value::Null)
    }

    fn call(self, method: Method, args: Vec<Expr>) -> Expr {
        Expr::Call {
            method,
            target: Box::new(self),
            args,
        }
    }

    pub fn contains(self, arg: impl IntoExpr) -> Expr {
        self.call(Method::Contains, vec![arg.into_expr()])
    }

    pub fn starts_with(self, arg: impl IntoExpr) -> Expr {
        self.call(Method::StartsWith, vec![arg.into_expr()])
    }

    pub fn ends_with(self, arg: impl IntoExpr) -> Expr {
        self.call(Method::EndsWith, vec![arg.into_expr()])
    }

    pub fn to_upper(self) -> Expr {
        self.call(Method::ToUpper, Vec::new())
    }

    pub fn to_lower(self) -> Expr {
        self.call(Method::ToLower, Vec::new())
    }

    pub fn trim(self) -> Expr {
        self.call(Method::Trim, Vec::new())
    }

    /// Membership test: `collection.contains(self)`
    pub fn is_in(self, collection: impl IntoExpr) -> Expr {
        collection.into_expr().contains(self)
    }

    pub fn when(test: Expr, then: impl IntoExpr, otherwise: impl IntoExpr) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then.into_expr()),
            otherwise: Box::new(otherwise.into_expr()),
        }
    }

    /// Whether any node of the tree reads a row parameter
    pub fn references_param(&self) -> bool {
        match self {
            Expr::Param(_) => true,
            Expr::Constant(_) | Expr::Local(_) => false,
            Expr::Member { target, .. } => target.references_param(),
            Expr::Binary { left, right, .. } => left.references_param() || right.references_param(),
            Expr::Not(inner) | Expr::Negate(inner) => inner.references_param(),
            Expr::Call { target, args, .. } => target.references_param() || args.iter().any(Expr::references_param),
            Expr::Conditional { test, then, otherwise } => test.references_param() || then.references_param() || otherwise.references_param(),
            Expr::Tuple(members) => members.iter().any(|(_, e)| e.references_param()),
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builds_member_of_first_param() {
        assert_eq!(
            field("ShopId"),
            Expr::Member {
                target: Box::new(Expr::Param(0)),
                name: "ShopId".to_string()
            }
        );
    }

    #[test]
    fn test_is_in_reverses_to_collection_contains() {
        let expr = field("ShopId").is_in(vec![1i64, 2]);
        match expr {
            Expr::Call { method, target, args } => {
                assert_eq!(method, Method::Contains);
                assert_eq!(*target, Expr::Constant(Value::List(vec![Value::Int(1), Value::Int(2)])));
                assert_eq!(args, vec![field("ShopId")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_references_param() {
        assert!(field("A").eq(1).references_param());
        assert!(!lit(1).plus(local("x", || Value::Int(2))).references_param());
    }

    #[test]
    fn test_captured_serializes_current_value() {
        let expr = local("limit", || Value::Int(7));
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        match back {
            Expr::Local(captured) => {
                assert_eq!(captured.name(), "limit");
                assert_eq!(captured.value(), Value::Int(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
