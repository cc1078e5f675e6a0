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

//! # Query Formatter
//!
//! Renders an optimized select as single-line dialect text.
//!
//! Predicates and values are rendered in two contexts. In predicate
//! position a bare boolean column becomes `([c] = 1)` and its negation
//! `([c] = 0)`; comparisons against `NULL` become `IS [NOT] NULL`; an empty
//! membership list is `(1 = 0)`. In value position a predicate is wrapped in
//! `CASE WHEN … THEN 1 ELSE 0 END`.
//!
//! Caller values are bound as `@pN` placeholders by default. In
//! [`ParameterMode::Inline`] they are rendered as literals: strings quoted
//! with embedded quotes doubled, enums by member name, booleans as 1/0 and
//! dates in ISO form after calendar correction.

use super::builder::JoinKind;
use super::expr::BinaryOp;
use super::ir::{alias_name, ColumnRef, LikeKind, Select, Source, SqlExpr, SqlFunction};
use crate::entity::ColumnType;
use dotrel_common::calendar::{correct_date, correct_datetime, correct_offset_datetime};
use dotrel_common::{ParameterMode, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const DATETIME_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Command text and the values bound to its placeholders, in order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlCommand {
    pub text: String,
    pub params: Vec<Value>,
}

impl SqlCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Vec<Value>) -> Self {
        Self { text: text.into(), params }
    }
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `[name]`, with `]` doubled
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `[schema].[table]`
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Escape pattern metacharacters so the text matches literally
pub fn escape_like(text: &str) -> String {
    text.replace('[', "[[]").replace('%', "[%]").replace('_', "[_]")
}

/// Inline literal text of a value
pub fn format_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote_text(s),
        Value::Enum(e) => quote_text(&e.member),
        Value::Date(d) => quote_text(&correct_date(*d).format(DATE_FORMAT).to_string()),
        Value::DateTime(dt) => quote_text(&correct_datetime(*dt).format(DATETIME_FORMAT).to_string()),
        Value::DateTimeOffset(dt) => quote_text(&correct_offset_datetime(*dt).format(DATETIME_OFFSET_FORMAT).to_string()),
        Value::Guid(g) => quote_text(&g.to_string()),
        Value::List(items) => format!("({})", items.iter().map(format_literal).collect::<Vec<_>>().join(", ")),
    }
}

pub struct Formatter<'a> {
    schema: &'a str,
    mode: ParameterMode,
    params: Vec<Value>,
}

impl<'a> Formatter<'a> {
    pub fn new(schema: &'a str, mode: ParameterMode) -> Self {
        Self {
            schema,
            mode,
            params: Vec::new(),
        }
    }

    /// Render `select` for the tenant `schema`
    pub fn format(schema: &str, mode: ParameterMode, select: &Select) -> SqlCommand {
        let mut formatter = Formatter::new(schema, mode);
        let text = formatter.select(select);
        SqlCommand::with_params(text, formatter.params)
    }

    fn select(&mut self, select: &Select) -> String {
        let mut sql = String::from("SELECT ");
        if select.distinct {
            sql.push_str("DISTINCT ");
        }
        if let Some(count) = select.take {
            sql.push_str(&format!("TOP ({count}) "));
        }
        let columns = self.columns(select);
        sql.push_str(&columns);
        sql.push_str(" FROM ");
        let source = self.source(&select.from);
        sql.push_str(&source);

        if let Some(predicate) = &select.predicate {
            let predicate = self.predicate(predicate);
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        if !select.order_by.is_empty() {
            let keys: Vec<String> = select
                .order_by
                .iter()
                .map(|key| {
                    let expr = self.value(&key.expr);
                    if key.descending { format!("{expr} DESC") } else { expr }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(paging) = &select.paging {
            sql.push_str(&format!(" OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", paging.offset, paging.fetch));
        }
        sql
    }

    fn columns(&mut self, select: &Select) -> String {
        if let Source::Select(inner) = &select.from
            && inner.columns.len() == select.columns.len()
            && select.is_pass_through_of(inner.alias)
            && inner.columns.iter().zip(&select.columns).all(|(a, b)| a.name == b.name)
        {
            return "*".to_string();
        }

        select
            .columns
            .iter()
            .map(|column| {
                let rendered = self.value(&column.expr);
                match &column.expr {
                    SqlExpr::Column(c) if c.name == column.name => rendered,
                    _ => format!("{rendered} AS {}", quote_identifier(&column.name)),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn source(&mut self, source: &Source) -> String {
        match source {
            Source::Table(table) => format!(
                "{} AS {}",
                qualified_table(table.entity.schema_for(self.schema), table.entity.table()),
                quote_identifier(&alias_name(table.alias))
            ),
            Source::Select(select) => {
                let inner = self.select(select);
                format!("({inner}) AS {}", quote_identifier(&alias_name(select.alias)))
            }
            Source::Join(join) => {
                let left = self.source(&join.left);
                let right = self.source(&join.right);
                let condition = self.predicate(&join.condition);
                let keyword = match join.kind {
                    JoinKind::Inner => "INNER JOIN",
                    JoinKind::LeftOuter => "LEFT OUTER JOIN",
                };
                format!("{left} {keyword} {right} ON {condition}")
            }
        }
    }

    fn column(column: &ColumnRef) -> String {
        format!("{}.{}", quote_identifier(&alias_name(column.alias)), quote_identifier(&column.name))
    }

    fn predicate(&mut self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column(c) if c.ty == Some(ColumnType::Bool) => format!("({} = 1)", Self::column(c)),
            SqlExpr::Literal(Value::Bool(true)) => "(1 = 1)".to_string(),
            SqlExpr::Literal(Value::Bool(false)) => "(1 = 0)".to_string(),
            SqlExpr::Not(inner) => match inner.as_ref() {
                SqlExpr::Column(c) if c.ty == Some(ColumnType::Bool) => format!("({} = 0)", Self::column(c)),
                SqlExpr::Not(twice) => self.predicate(twice),
                SqlExpr::In { values, .. } if values.is_empty() => "(1 = 1)".to_string(),
                SqlExpr::Literal(Value::Bool(true)) => "(1 = 0)".to_string(),
                SqlExpr::Literal(Value::Bool(false)) => "(1 = 1)".to_string(),
                other => format!("NOT {}", self.predicate(other)),
            },
            SqlExpr::Binary { op, left, right } if op.is_logical() => {
                let left = self.predicate(left);
                let right = self.predicate(right);
                format!("({left} {} {right})", op.symbol())
            }
            SqlExpr::Binary { op, left, right } if op.is_comparison() => self.comparison(*op, left, right),
            SqlExpr::In { values, .. } if values.is_empty() => "(1 = 0)".to_string(),
            SqlExpr::In { expr, values } => {
                let expr = self.value(expr);
                let values: Vec<String> = values.iter().map(|v| self.literal(v)).collect();
                format!("({expr} IN ({}))", values.join(", "))
            }
            SqlExpr::Like { expr, kind, pattern } => {
                let expr = self.value(expr);
                let pattern = self.like_pattern(*kind, pattern);
                format!("({expr} LIKE {pattern})")
            }
            other => format!("({} = 1)", self.value(other)),
        }
    }

    fn comparison(&mut self, op: BinaryOp, left: &SqlExpr, right: &SqlExpr) -> String {
        let null_test = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
        let negation = if op == BinaryOp::Ne { "NOT " } else { "" };
        match (left, right) {
            (operand, SqlExpr::Literal(Value::Null)) | (SqlExpr::Literal(Value::Null), operand) if null_test => {
                format!("({} IS {negation}NULL)", self.value(operand))
            }
            _ => {
                let left = self.value(left);
                let right = self.value(right);
                format!("({left} {} {right})", op.symbol())
            }
        }
    }

    fn like_pattern(&mut self, kind: LikeKind, pattern: &SqlExpr) -> String {
        let (prefix, suffix) = match kind {
            LikeKind::Contains => ("%", "%"),
            LikeKind::StartsWith => ("", "%"),
            LikeKind::EndsWith => ("%", ""),
        };
        let text = match pattern {
            SqlExpr::Literal(Value::Text(s)) => Some(s.as_str()),
            SqlExpr::Literal(Value::Enum(e)) => Some(e.member.as_str()),
            _ => None,
        };
        match text {
            Some(text) => self.literal(&Value::Text(format!("{prefix}{}{suffix}", escape_like(text)))),
            None => {
                let value = self.value(pattern);
                let prefix = if prefix.is_empty() { "" } else { "'%' + " };
                let suffix = if suffix.is_empty() { "" } else { " + '%'" };
                format!("{prefix}{value}{suffix}")
            }
        }
    }

    fn value(&mut self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column(c) => Self::column(c),
            SqlExpr::Literal(v) => self.literal(v),
            SqlExpr::Binary { op, left, right } if op.is_arithmetic() => {
                let left = self.value(left);
                let right = self.value(right);
                format!("({left} {} {right})", op.symbol())
            }
            SqlExpr::Negate(inner) => format!("(-{})", self.value(inner)),
            SqlExpr::Function { function, arg } => {
                let arg = self.value(arg);
                match function {
                    SqlFunction::Upper => format!("UPPER({arg})"),
                    SqlFunction::Lower => format!("LOWER({arg})"),
                    SqlFunction::Trim => format!("LTRIM(RTRIM({arg}))"),
                }
            }
            SqlExpr::Case { test, then, otherwise } => {
                let test = self.predicate(test);
                let then = self.value(then);
                let otherwise = self.value(otherwise);
                format!("CASE WHEN {test} THEN {then} ELSE {otherwise} END")
            }
            SqlExpr::Aggregate { kind, arg } => match arg {
                Some(arg) => format!("{}({})", kind.function_name(), self.value(arg)),
                None => format!("{}(*)", kind.function_name()),
            },
            predicate => format!("CASE WHEN {} THEN 1 ELSE 0 END", self.predicate(predicate)),
        }
    }

    fn literal(&mut self, value: &Value) -> String {
        match (self.mode, value) {
            (_, Value::Null) => "NULL".to_string(),
            (ParameterMode::Inline, value) => format_literal(value),
            (ParameterMode::Bound, Value::List(items)) => {
                let items: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                format!("({})", items.join(", "))
            }
            (ParameterMode::Bound, value) => {
                let placeholder = format!("@p{}", self.params.len());
                self.params.push(value.to_wire());
                placeholder
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityDescriptor;
    use crate::query::ir::{ColumnDecl, OrderKey, Paging, TableRef};
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use dotrel_common::EnumValue;
    use std::sync::Arc;

    fn shop_column(name: &str, ty: ColumnType) -> SqlExpr {
        SqlExpr::column(0, name, Some(ty))
    }

    fn over_shop(predicate: SqlExpr) -> Select {
        let entity = Arc::new(EntityDescriptor::new("Shop"));
        let mut select = Select::new(
            1,
            vec![ColumnDecl::new("ShopId", shop_column("ShopId", ColumnType::Int))],
            Source::Table(TableRef { alias: 0, entity }),
        );
        select.predicate = Some(predicate);
        select
    }

    fn inline(predicate: SqlExpr) -> String {
        Formatter::format("tenant", ParameterMode::Inline, &over_shop(predicate)).text
    }

    fn where_clause(predicate: SqlExpr) -> String {
        let text = inline(predicate);
        text.split(" WHERE ").nth(1).unwrap().to_string()
    }

    #[test]
    fn test_select_shape() {
        let text = inline(SqlExpr::binary(BinaryOp::Eq, shop_column("ShopId", ColumnType::Int), SqlExpr::Literal(Value::Int(1))));
        assert_eq!(text, "SELECT [t0].[ShopId] FROM [tenant].[Shop] AS [t0] WHERE ([t0].[ShopId] = 1)");
    }

    #[test]
    fn test_bare_boolean_column() {
        let active = shop_column("IsActive", ColumnType::Bool);
        assert_eq!(where_clause(active.clone()), "([t0].[IsActive] = 1)");
        assert_eq!(where_clause(SqlExpr::Not(Box::new(active.clone()))), "([t0].[IsActive] = 0)");

        let nested = SqlExpr::binary(
            BinaryOp::Or,
            SqlExpr::binary(BinaryOp::Gt, shop_column("ShopId", ColumnType::Int), SqlExpr::Literal(Value::Int(3))),
            SqlExpr::Not(Box::new(active)),
        );
        assert_eq!(where_clause(nested), "(([t0].[ShopId] > 3) OR ([t0].[IsActive] = 0))");
    }

    #[test]
    fn test_explicit_boolean_comparison_renders_one_zero() {
        let expr = SqlExpr::binary(BinaryOp::Eq, shop_column("IsActive", ColumnType::Bool), SqlExpr::Literal(Value::Bool(false)));
        assert_eq!(where_clause(expr), "([t0].[IsActive] = 0)");
    }

    #[test]
    fn test_null_comparisons() {
        let name = shop_column("Name", ColumnType::Text);
        let eq = SqlExpr::binary(BinaryOp::Eq, name.clone(), SqlExpr::Literal(Value::Null));
        let ne = SqlExpr::binary(BinaryOp::Ne, SqlExpr::Literal(Value::Null), name);
        assert_eq!(where_clause(eq), "([t0].[Name] IS NULL)");
        assert_eq!(where_clause(ne), "([t0].[Name] IS NOT NULL)");
    }

    #[test]
    fn test_membership() {
        let column = || Box::new(shop_column("ShopId", ColumnType::Int));
        let empty = SqlExpr::In { expr: column(), values: vec![] };
        assert_eq!(where_clause(empty.clone()), "(1 = 0)");
        assert_eq!(where_clause(SqlExpr::Not(Box::new(empty))), "(1 = 1)");

        let list = SqlExpr::In {
            expr: column(),
            values: vec![Value::Int(3), Value::Null, Value::Int(1)],
        };
        assert_eq!(where_clause(list.clone()), "([t0].[ShopId] IN (3, NULL, 1))");
        assert_eq!(where_clause(SqlExpr::Not(Box::new(list))), "NOT ([t0].[ShopId] IN (3, NULL, 1))");
    }

    #[test]
    fn test_enum_renders_member_name() {
        let open = Value::Enum(EnumValue::new("SessionStatus", "Open", 1));
        let expr = SqlExpr::binary(BinaryOp::Eq, shop_column("Status", ColumnType::Enum), SqlExpr::Literal(open.clone()));
        assert_eq!(where_clause(expr), "([t0].[Status] = 'Open')");

        let listed = SqlExpr::In {
            expr: Box::new(shop_column("Status", ColumnType::Enum)),
            values: vec![open],
        };
        assert_eq!(where_clause(listed), "([t0].[Status] IN ('Open'))");
    }

    #[test]
    fn test_strings_are_quoted_and_like_escaped() {
        let name = || Box::new(shop_column("Name", ColumnType::Text));
        let eq = SqlExpr::binary(BinaryOp::Eq, shop_column("Name", ColumnType::Text), SqlExpr::Literal(Value::from("O'Hara")));
        assert_eq!(where_clause(eq), "([t0].[Name] = 'O''Hara')");

        let like = |kind| SqlExpr::Like {
            expr: name(),
            kind,
            pattern: Box::new(SqlExpr::Literal(Value::from("5%_[a]"))),
        };
        assert_eq!(where_clause(like(LikeKind::Contains)), "([t0].[Name] LIKE '%5[%][_][[]a]%')");
        assert_eq!(where_clause(like(LikeKind::StartsWith)), "([t0].[Name] LIKE '5[%][_][[]a]%')");
        assert_eq!(where_clause(like(LikeKind::EndsWith)), "([t0].[Name] LIKE '%5[%][_][[]a]')");
    }

    #[test]
    fn test_dates_are_calendar_corrected() {
        let d = |y| Value::Date(NaiveDate::from_ymd_opt(y, 3, 14).unwrap());
        assert_eq!(format_literal(&d(2568)), format_literal(&d(2025)));
        assert_eq!(format_literal(&d(3111)), format_literal(&d(2025)));
        assert_eq!(format_literal(&d(2025)), "'2025-03-14'");

        let dt = NaiveDate::from_ymd_opt(2568, 1, 2).unwrap().and_hms_milli_opt(3, 4, 5, 60).unwrap();
        assert_eq!(format_literal(&Value::DateTime(dt)), "'2025-01-02T03:04:05.060'");

        let offset = FixedOffset::east_opt(7 * 3600).unwrap().with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(format_literal(&Value::DateTimeOffset(offset)), "'2025-06-01T08:00:00.000+07:00'");
    }

    #[test]
    fn test_bound_mode_collects_params_in_text_order() {
        let predicate = SqlExpr::binary(
            BinaryOp::And,
            SqlExpr::binary(BinaryOp::Eq, shop_column("Name", ColumnType::Text), SqlExpr::Literal(Value::from("a"))),
            SqlExpr::In {
                expr: Box::new(shop_column("Status", ColumnType::Enum)),
                values: vec![Value::Enum(EnumValue::new("S", "Open", 1)), Value::Null],
            },
        );
        let command = Formatter::format("tenant", ParameterMode::Bound, &over_shop(predicate));
        assert!(command.text.ends_with("WHERE (([t0].[Name] = @p0) AND ([t0].[Status] IN (@p1, NULL)))"));
        assert_eq!(command.params, vec![Value::from("a"), Value::from("Open")]);
    }

    #[test]
    fn test_pass_through_renders_star_and_paging() {
        let inner = over_shop(SqlExpr::Column(ColumnRef::new(0, "IsActive", Some(ColumnType::Bool))));
        let mut outer = Select::new(
            2,
            vec![ColumnDecl::new("ShopId", SqlExpr::column(1, "ShopId", Some(ColumnType::Int)))],
            Source::Select(Box::new(inner)),
        );
        outer.order_by.push(OrderKey {
            expr: SqlExpr::column(1, "ShopId", Some(ColumnType::Int)),
            descending: true,
        });
        outer.paging = Some(Paging { offset: 20, fetch: 10 });
        let text = Formatter::format("tenant", ParameterMode::Inline, &outer).text;
        assert_eq!(
            text,
            "SELECT * FROM (SELECT [t0].[ShopId] FROM [tenant].[Shop] AS [t0] WHERE ([t0].[IsActive] = 1)) AS [t1] \
             ORDER BY [t1].[ShopId] DESC OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_identifiers_and_aggregates() {
        assert_eq!(quote_identifier("we]ird"), "[we]]ird]");
        let mut select = over_shop(SqlExpr::Literal(Value::Bool(true)));
        select.columns = vec![ColumnDecl::new("agg", SqlExpr::Aggregate { kind: crate::query::AggregateKind::Count, arg: None })];
        select.take = Some(1);
        select.distinct = true;
        let text = Formatter::format("tenant", ParameterMode::Inline, &select).text;
        assert_eq!(text, "SELECT DISTINCT TOP (1) COUNT(*) AS [agg] FROM [tenant].[Shop] AS [t0] WHERE (1 = 1)");
    }
}
