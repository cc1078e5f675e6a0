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

//! Scalar values carried by query literals, bound parameters and result rows.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },
    #[error("Unsupported operation {operation} for {left} and {right}")]
    UnsupportedOperation { operation: &'static str, left: &'static str, right: &'static str },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Integer overflow in {0}")]
    Overflow(&'static str),
}

/// Member of a declared enumeration.
///
/// Enumerations are persisted and compared by member name, never by ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumValue {
    pub type_name: String,
    pub member: String,
    pub ordinal: i64,
}

impl EnumValue {
    pub fn new(type_name: impl Into<String>, member: impl Into<String>, ordinal: i64) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
            ordinal,
        }
    }

    /// Capture a member of a Rust enum implementing [`DeclaredEnum`]
    pub fn of<E: DeclaredEnum>(member: &E) -> Self {
        Self::new(E::TYPE_NAME, member.member_name(), member.ordinal())
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.member)
    }
}

/// Rust enums whose members are stored by their declared name
pub trait DeclaredEnum {
    const TYPE_NAME: &'static str;

    fn member_name(&self) -> &'static str;

    fn ordinal(&self) -> i64;
}

/// Scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Enum(EnumValue),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Guid(Uuid),
    List(Vec<Value>),
}

impl Value {
    pub fn from_enum<E: DeclaredEnum>(member: &E) -> Self {
        Value::Enum(EnumValue::of(member))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Enum(_) => "enum",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::DateTimeOffset(_) => "datetimeoffset",
            Value::Guid(_) => "guid",
            Value::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean view; integer 0/1 is accepted since bit columns come back as integers from some drivers
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(ValueError::TypeMismatch {
                expected: "bool",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_i64(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(ValueError::TypeMismatch {
                expected: "int",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Text(s) => Ok(s),
            Value::Enum(e) => Ok(&e.member),
            other => Err(ValueError::TypeMismatch {
                expected: "text",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_offset_datetime(&self) -> Result<Option<DateTime<FixedOffset>>, ValueError> {
        match self {
            Value::Null => Ok(None),
            Value::DateTimeOffset(dt) => Ok(Some(*dt)),
            other => Err(ValueError::TypeMismatch {
                expected: "datetimeoffset",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn as_optional_text(&self) -> Result<Option<String>, ValueError> {
        match self {
            Value::Null => Ok(None),
            other => other.as_str().map(|s| Some(s.to_string())),
        }
    }

    /// Value in the shape the database receives it: enums become their member name
    /// and dates are calendar corrected.
    pub fn to_wire(&self) -> Value {
        match self {
            Value::Enum(e) => Value::Text(e.member.clone()),
            Value::Date(_) | Value::DateTime(_) | Value::DateTimeOffset(_) => self.calendar_corrected(),
            other => other.clone(),
        }
    }

    /// Logical negation, used when folding constant predicates
    pub fn not(&self) -> Result<Value, ValueError> {
        Ok(Value::Bool(!self.as_bool()?))
    }

    pub fn negate(&self) -> Result<Value, ValueError> {
        match self {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(ValueError::Overflow("neg")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ValueError::TypeMismatch {
                expected: "number",
                actual: other.kind_name(),
            }),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
            _ => Err(self.unsupported("add", other)),
        }
    }

    pub fn arithmetic(&self, operation: &'static str, other: &Value) -> Result<Value, ValueError> {
        if operation == "add" {
            return self.add(other);
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => match operation {
                "sub" => Ok(Value::Int(a.wrapping_sub(*b))),
                "mul" => Ok(Value::Int(a.wrapping_mul(*b))),
                "div" if *b == 0 => Err(ValueError::DivisionByZero),
                "div" => a.checked_div(*b).map(Value::Int).ok_or(ValueError::Overflow(operation)),
                "mod" if *b == 0 => Err(ValueError::DivisionByZero),
                "mod" => a.checked_rem(*b).map(Value::Int).ok_or(ValueError::Overflow(operation)),
                _ => Err(self.unsupported(operation, other)),
            },
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                match operation {
                    "sub" => Ok(Value::Float(a - b)),
                    "mul" => Ok(Value::Float(a * b)),
                    "div" => Ok(Value::Float(a / b)),
                    "mod" => Ok(Value::Float(a % b)),
                    _ => Err(self.unsupported(operation, other)),
                }
            }
            _ => Err(self.unsupported(operation, other)),
        }
    }

    /// Equality between two folded constants. Enums compare equal to their member name.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Enum(e), Value::Text(s)) | (Value::Text(s), Value::Enum(e)) => &e.member == s,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
            _ => self == other,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => self.as_f64().ok()?.partial_cmp(&other.as_f64().ok()?),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTimeOffset(a), Value::DateTimeOffset(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Result<f64, ValueError> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            other => Err(ValueError::TypeMismatch {
                expected: "number",
                actual: other.kind_name(),
            }),
        }
    }

    fn unsupported(&self, operation: &'static str, other: &Value) -> ValueError {
        ValueError::UnsupportedOperation {
            operation,
            left: self.kind_name(),
            right: other.kind_name(),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<EnumValue> for Value {
    fn from(value: EnumValue) -> Self {
        Value::Enum(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTimeOffset(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Guid(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Enum(e) => write!(f, "{e}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::DateTime(d) => write!(f, "{d}"),
            Value::DateTimeOffset(d) => write!(f, "{d}"),
            Value::Guid(g) => write!(f, "{g}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Status {
        Open,
        Closed,
    }

    impl DeclaredEnum for Status {
        const TYPE_NAME: &'static str = "SessionStatus";

        fn member_name(&self) -> &'static str {
            match self {
                Status::Open => "Open",
                Status::Closed => "Closed",
            }
        }

        fn ordinal(&self) -> i64 {
            *self as i64
        }
    }

    #[test]
    fn test_enum_wire_form_is_member_name() {
        let value = Value::from_enum(&Status::Closed);
        assert_eq!(value.to_wire(), Value::Text("Closed".to_string()));
        assert!(value.loose_eq(&Value::from("Closed")));
        assert!(!value.loose_eq(&Value::Int(1)));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(Value::Int(7).arithmetic("mod", &Value::Int(4)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(1).arithmetic("div", &Value::Int(0)), Err(ValueError::DivisionByZero));
        assert_eq!(Value::from("a").add(&Value::from("b")).unwrap(), Value::from("ab"));
        assert!(Value::Bool(true).add(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let min = Value::Int(i64::MIN);
        assert_eq!(min.negate(), Err(ValueError::Overflow("neg")));
        assert_eq!(min.arithmetic("div", &Value::Int(-1)), Err(ValueError::Overflow("div")));
        assert_eq!(min.arithmetic("mod", &Value::Int(-1)), Err(ValueError::Overflow("mod")));
        assert_eq!(Value::Int(i64::MAX).negate(), Ok(Value::Int(-i64::MAX)));
        assert_eq!(min.arithmetic("div", &Value::Int(2)), Ok(Value::Int(i64::MIN / 2)));
    }

    #[test]
    fn test_bool_accepts_bit_integers() {
        assert!(Value::Int(1).as_bool().unwrap());
        assert!(!Value::Int(0).as_bool().unwrap());
        assert!(Value::Int(2).as_bool().is_err());
    }

    #[test]
    fn test_option_and_vec_conversions() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(vec![1i64, 2]), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }
}
