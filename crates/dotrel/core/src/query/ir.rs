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

//! Relational intermediate representation.
//!
//! Every bound operator produces a [`Select`] whose columns are named and
//! whose expressions reference columns of the select's own source by alias.
//! Aliases are unique across a whole tree, so an alias alone identifies the
//! table, subquery or join side a [`ColumnRef`] points into.

use super::builder::{AggregateKind, JoinKind};
use super::expr::BinaryOp;
use crate::entity::{ColumnRole, ColumnType, EntityDescriptor};
use dotrel_common::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type Alias = u32;

pub fn alias_name(alias: Alias) -> String {
    format!("t{alias}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: Alias,
    pub name: String,
    pub ty: Option<ColumnType>,
}

impl ColumnRef {
    pub fn new(alias: Alias, name: impl Into<String>, ty: Option<ColumnType>) -> Self {
        Self {
            alias,
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFunction {
    Upper,
    Lower,
    Trim,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column(ColumnRef),
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    Negate(Box<SqlExpr>),
    /// Membership in a literal list; element order is preserved
    In {
        expr: Box<SqlExpr>,
        values: Vec<Value>,
    },
    Like {
        expr: Box<SqlExpr>,
        kind: LikeKind,
        pattern: Box<SqlExpr>,
    },
    Function {
        function: SqlFunction,
        arg: Box<SqlExpr>,
    },
    Case {
        test: Box<SqlExpr>,
        then: Box<SqlExpr>,
        otherwise: Box<SqlExpr>,
    },
    /// `None` argument is `COUNT(*)`
    Aggregate {
        kind: AggregateKind,
        arg: Option<Box<SqlExpr>>,
    },
}

impl SqlExpr {
    pub fn column(alias: Alias, name: impl Into<String>, ty: Option<ColumnType>) -> Self {
        SqlExpr::Column(ColumnRef::new(alias, name, ty))
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction of two optional predicates, left first
    pub fn and_also(left: Option<SqlExpr>, right: Option<SqlExpr>) -> Option<SqlExpr> {
        match (left, right) {
            (Some(l), Some(r)) => Some(SqlExpr::binary(BinaryOp::And, l, r)),
            (l, r) => l.or(r),
        }
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            SqlExpr::Column(c) => c.ty,
            SqlExpr::Literal(v) => ColumnType::of(v),
            SqlExpr::Binary { op, left, right } => {
                if op.is_arithmetic() {
                    left.column_type().or_else(|| right.column_type())
                } else {
                    Some(ColumnType::Bool)
                }
            }
            SqlExpr::Not(_) | SqlExpr::In { .. } | SqlExpr::Like { .. } => Some(ColumnType::Bool),
            SqlExpr::Negate(inner) => inner.column_type(),
            SqlExpr::Function { .. } => Some(ColumnType::Text),
            SqlExpr::Case { then, otherwise, .. } => then.column_type().or_else(|| otherwise.column_type()),
            SqlExpr::Aggregate { kind, arg } => match kind {
                AggregateKind::Count => Some(ColumnType::Int),
                AggregateKind::Average => Some(ColumnType::Float),
                _ => arg.as_ref().and_then(|a| a.column_type()),
            },
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SqlExpr::Aggregate { .. })
    }

    pub fn visit_columns<'a>(&'a self, visit: &mut impl FnMut(&'a ColumnRef)) {
        match self {
            SqlExpr::Column(c) => visit(c),
            SqlExpr::Literal(_) => {}
            SqlExpr::Binary { left, right, .. } => {
                left.visit_columns(visit);
                right.visit_columns(visit);
            }
            SqlExpr::Not(inner) | SqlExpr::Negate(inner) => inner.visit_columns(visit),
            SqlExpr::In { expr, .. } => expr.visit_columns(visit),
            SqlExpr::Like { expr, pattern, .. } => {
                expr.visit_columns(visit);
                pattern.visit_columns(visit);
            }
            SqlExpr::Function { arg, .. } => arg.visit_columns(visit),
            SqlExpr::Case { test, then, otherwise } => {
                test.visit_columns(visit);
                then.visit_columns(visit);
                otherwise.visit_columns(visit);
            }
            SqlExpr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.visit_columns(visit);
                }
            }
        }
    }

    /// Rewrite every column reference in place
    pub fn rewrite_columns(&mut self, rewrite: &mut impl FnMut(&ColumnRef) -> Option<SqlExpr>) {
        match self {
            SqlExpr::Column(c) => {
                if let Some(replacement) = rewrite(c) {
                    *self = replacement;
                }
            }
            SqlExpr::Literal(_) => {}
            SqlExpr::Binary { left, right, .. } => {
                left.rewrite_columns(rewrite);
                right.rewrite_columns(rewrite);
            }
            SqlExpr::Not(inner) | SqlExpr::Negate(inner) => inner.rewrite_columns(rewrite),
            SqlExpr::In { expr, .. } => expr.rewrite_columns(rewrite),
            SqlExpr::Like { expr, pattern, .. } => {
                expr.rewrite_columns(rewrite);
                pattern.rewrite_columns(rewrite);
            }
            SqlExpr::Function { arg, .. } => arg.rewrite_columns(rewrite),
            SqlExpr::Case { test, then, otherwise } => {
                test.rewrite_columns(rewrite);
                then.rewrite_columns(rewrite);
                otherwise.rewrite_columns(rewrite);
            }
            SqlExpr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.rewrite_columns(rewrite);
                }
            }
        }
    }

    pub fn realias(&mut self, remap: &HashMap<Alias, Alias>) {
        self.rewrite_columns(&mut |c| remap.get(&c.alias).map(|to| SqlExpr::Column(ColumnRef::new(*to, c.name.clone(), c.ty))));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDecl {
    pub name: String,
    pub expr: SqlExpr,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, expr: SqlExpr) -> Self {
        Self { name: name.into(), expr }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expr: SqlExpr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub alias: Alias,
    pub entity: Arc<EntityDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub left: Source,
    pub right: Source,
    pub condition: SqlExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Table(TableRef),
    Select(Box<Select>),
    Join(Box<Join>),
}

impl Source {
    /// Alias the source is visible under; joins expose both sides instead
    pub fn alias(&self) -> Option<Alias> {
        match self {
            Source::Table(t) => Some(t.alias),
            Source::Select(s) => Some(s.alias),
            Source::Join(_) => None,
        }
    }

    pub fn max_alias(&self) -> Alias {
        match self {
            Source::Table(t) => t.alias,
            Source::Select(s) => s.max_alias(),
            Source::Join(j) => j.left.max_alias().max(j.right.max_alias()),
        }
    }

    /// Subqueries directly reachable from this source, left to right
    pub fn selects_mut(&mut self) -> Vec<&mut Select> {
        match self {
            Source::Table(_) => Vec::new(),
            Source::Select(s) => vec![s.as_mut()],
            Source::Join(j) => {
                let Join { left, right, .. } = j.as_mut();
                let mut selects = left.selects_mut();
                selects.extend(right.selects_mut());
                selects
            }
        }
    }

    pub fn selects(&self) -> Vec<&Select> {
        match self {
            Source::Table(_) => Vec::new(),
            Source::Select(s) => vec![s.as_ref()],
            Source::Join(j) => {
                let mut selects = j.left.selects();
                selects.extend(j.right.selects());
                selects
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: u64,
    pub fetch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub alias: Alias,
    pub columns: Vec<ColumnDecl>,
    pub from: Source,
    pub predicate: Option<SqlExpr>,
    pub order_by: Vec<OrderKey>,
    pub distinct: bool,
    pub take: Option<u64>,
    pub paging: Option<Paging>,
}

impl Select {
    pub fn new(alias: Alias, columns: Vec<ColumnDecl>, from: Source) -> Self {
        Self {
            alias,
            columns,
            from,
            predicate: None,
            order_by: Vec::new(),
            distinct: false,
            take: None,
            paging: None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.columns.iter().any(|c| c.expr.is_aggregate())
    }

    /// Whether the rows this select produces depend on more than its source's rows
    pub fn has_row_modifiers(&self) -> bool {
        self.distinct || self.take.is_some() || self.paging.is_some() || self.is_aggregate()
    }

    pub fn max_alias(&self) -> Alias {
        self.alias.max(self.from.max_alias())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Reference to output column `name` of this select, as seen by its parent
    pub fn output_ref(&self, name: &str) -> Option<SqlExpr> {
        self.column(name).map(|c| SqlExpr::column(self.alias, name, c.expr.column_type()))
    }

    pub fn unique_name(&self, hint: &str) -> String {
        unique_name(hint, &self.columns.iter().map(|c| c.name.as_str()).collect())
    }

    /// Name of an output column computing `expr`, adding one if needed
    pub fn ensure_column(&mut self, expr: &SqlExpr) -> String {
        if let Some(existing) = self.columns.iter().find(|c| &c.expr == expr) {
            return existing.name.clone();
        }
        let hint = match expr {
            SqlExpr::Column(c) => c.name.clone(),
            _ => "c".to_string(),
        };
        let name = self.unique_name(&hint);
        self.columns.push(ColumnDecl::new(name.clone(), expr.clone()));
        name
    }

    /// Columns are plain references to `alias` under their own names
    pub fn is_pass_through_of(&self, alias: Alias) -> bool {
        self.columns
            .iter()
            .all(|c| matches!(&c.expr, SqlExpr::Column(r) if r.alias == alias && r.name == c.name))
    }

    /// Rewrite every expression owned by this select (not its subqueries)
    pub fn rewrite_own_columns(&mut self, rewrite: &mut impl FnMut(&ColumnRef) -> Option<SqlExpr>) {
        for column in &mut self.columns {
            column.expr.rewrite_columns(rewrite);
        }
        if let Some(predicate) = &mut self.predicate {
            predicate.rewrite_columns(rewrite);
        }
        for key in &mut self.order_by {
            key.expr.rewrite_columns(rewrite);
        }
        rewrite_join_conditions(&mut self.from, rewrite);
    }

    /// Column references made by this select's own expressions, by alias
    pub fn own_references(&self) -> HashMap<Alias, HashSet<String>> {
        let mut refs: HashMap<Alias, HashSet<String>> = HashMap::new();
        let mut record = |c: &ColumnRef| {
            refs.entry(c.alias).or_default().insert(c.name.clone());
        };
        for column in &self.columns {
            column.expr.visit_columns(&mut record);
        }
        if let Some(predicate) = &self.predicate {
            predicate.visit_columns(&mut record);
        }
        for key in &self.order_by {
            key.expr.visit_columns(&mut record);
        }
        visit_join_conditions(&self.from, &mut record);
        refs
    }
}

fn rewrite_join_conditions(source: &mut Source, rewrite: &mut impl FnMut(&ColumnRef) -> Option<SqlExpr>) {
    if let Source::Join(join) = source {
        join.condition.rewrite_columns(rewrite);
        rewrite_join_conditions(&mut join.left, rewrite);
        rewrite_join_conditions(&mut join.right, rewrite);
    }
}

fn visit_join_conditions<'a>(source: &'a Source, visit: &mut impl FnMut(&'a ColumnRef)) {
    if let Source::Join(join) = source {
        join.condition.visit_columns(visit);
        visit_join_conditions(&join.left, visit);
        visit_join_conditions(&join.right, visit);
    }
}

pub fn unique_name(hint: &str, taken: &HashSet<&str>) -> String {
    if !taken.contains(hint) {
        return hint.to_string();
    }
    (1..)
        .map(|n| format!("{hint}{n}"))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| hint.to_string())
}

/// Result shape of a query, with leaves pointing at columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Entity columns keyed by the descriptor's column name
    Entity {
        entity: Arc<EntityDescriptor>,
        columns: Vec<(String, SqlExpr)>,
    },
    Scalar(SqlExpr),
    Tuple(Vec<(String, Shape)>),
}

impl Shape {
    /// Shape reached through member `name`
    pub fn member(&self, name: &str) -> Option<Shape> {
        match self {
            Shape::Entity { columns, .. } => columns.iter().find(|(n, _)| n == name).map(|(_, e)| Shape::Scalar(e.clone())),
            Shape::Tuple(members) => members.iter().find(|(n, _)| n == name).map(|(_, s)| s.clone()),
            Shape::Scalar(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Shape::Entity { entity, .. } => format!("entity {}", entity.name()),
            Shape::Scalar(_) => "scalar".to_string(),
            Shape::Tuple(members) => format!("tuple of {}", members.len()),
        }
    }

    /// Every leaf with its name hint, depth first
    pub fn leaves(&self) -> Vec<(&str, &SqlExpr)> {
        let mut leaves = Vec::new();
        self.collect_leaves(None, &mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, hint: Option<&'a str>, out: &mut Vec<(&'a str, &'a SqlExpr)>) {
        match self {
            Shape::Entity { columns, .. } => out.extend(columns.iter().map(|(n, e)| (n.as_str(), e))),
            Shape::Scalar(expr) => {
                let name = match (hint, expr) {
                    (Some(h), _) => h,
                    (None, SqlExpr::Column(c)) => c.name.as_str(),
                    (None, _) => "value",
                };
                out.push((name, expr));
            }
            Shape::Tuple(members) => {
                for (name, shape) in members {
                    shape.collect_leaves(Some(name), out);
                }
            }
        }
    }

    /// Leaves the projector reads: promoted entity columns are left out
    pub fn projected_leaves(&self) -> Vec<&SqlExpr> {
        match self {
            Shape::Entity { entity, columns } => columns
                .iter()
                .filter(|(n, _)| entity.column(n).is_none_or(|c| c.role != ColumnRole::Promoted))
                .map(|(_, e)| e)
                .collect(),
            Shape::Scalar(expr) => vec![expr],
            Shape::Tuple(members) => members.iter().flat_map(|(_, s)| s.projected_leaves()).collect(),
        }
    }

    /// Replace leaves in the order [`Shape::leaves`] yields them
    pub fn map_leaves(&self, next: &mut impl FnMut(&SqlExpr) -> SqlExpr) -> Shape {
        match self {
            Shape::Entity { entity, columns } => Shape::Entity {
                entity: entity.clone(),
                columns: columns.iter().map(|(n, e)| (n.clone(), next(e))).collect(),
            },
            Shape::Scalar(expr) => Shape::Scalar(next(expr)),
            Shape::Tuple(members) => Shape::Tuple(members.iter().map(|(n, s)| (n.clone(), s.map_leaves(next))).collect()),
        }
    }

    pub fn realias(&mut self, remap: &HashMap<Alias, Alias>) {
        *self = self.map_leaves(&mut |e| {
            let mut e = e.clone();
            e.realias(remap);
            e
        });
    }

    /// Drop entity entries whose column no longer exists on `select`
    pub fn retain_available(&mut self, select: &Select) {
        match self {
            Shape::Entity { columns, .. } => columns.retain(|(_, e)| match e {
                SqlExpr::Column(c) if c.alias == select.alias => select.column(&c.name).is_some(),
                _ => true,
            }),
            Shape::Scalar(_) => {}
            Shape::Tuple(members) => members.iter_mut().for_each(|(_, s)| s.retain_available(select)),
        }
    }
}

/// A bound query: the select producing rows and the shape built from them
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionExpr {
    pub select: Select,
    pub shape: Shape,
}

impl ProjectionExpr {
    /// Wrap the select in a pass-through select under a fresh alias
    pub fn wrapped(self) -> ProjectionExpr {
        let alias = self.select.max_alias() + 1;
        let inner_alias = self.select.alias;
        let columns = self
            .select
            .columns
            .iter()
            .map(|c| ColumnDecl::new(c.name.clone(), SqlExpr::column(inner_alias, c.name.clone(), c.expr.column_type())))
            .collect();
        let mut shape = self.shape;
        shape.realias(&HashMap::from([(inner_alias, alias)]));
        ProjectionExpr {
            select: Select::new(alias, columns, Source::Select(Box::new(self.select))),
            shape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_select() -> Select {
        let entity = Arc::new(EntityDescriptor::new("Shop").promote("Region", ColumnType::Text));
        let columns = entity
            .columns()
            .iter()
            .map(|c| ColumnDecl::new(c.name.clone(), SqlExpr::column(0, c.name.clone(), Some(c.ty))))
            .collect();
        Select::new(1, columns, Source::Table(TableRef { alias: 0, entity }))
    }

    #[test]
    fn test_ensure_column_reuses_existing() {
        let mut select = table_select();
        let before = select.columns.len();
        assert_eq!(select.ensure_column(&SqlExpr::column(0, "Region", Some(ColumnType::Text))), "Region");
        assert_eq!(select.columns.len(), before);

        let upper = SqlExpr::Function {
            function: SqlFunction::Upper,
            arg: Box::new(SqlExpr::column(0, "Region", Some(ColumnType::Text))),
        };
        assert_eq!(select.ensure_column(&upper), "c");
        assert_eq!(select.ensure_column(&upper), "c");
        assert_eq!(select.columns.len(), before + 1);
    }

    #[test]
    fn test_unique_name_suffixes() {
        let taken: HashSet<&str> = ["Document", "Document1"].into_iter().collect();
        assert_eq!(unique_name("Document", &taken), "Document2");
        assert_eq!(unique_name("ShopId", &taken), "ShopId");
    }

    #[test]
    fn test_wrapped_is_pass_through() {
        let select = table_select();
        let shape = Shape::Scalar(SqlExpr::column(1, "ShopId", Some(ColumnType::Int)));
        let wrapped = ProjectionExpr { select, shape }.wrapped();
        assert_eq!(wrapped.select.alias, 2);
        assert!(wrapped.select.is_pass_through_of(1));
        assert_eq!(wrapped.shape, Shape::Scalar(SqlExpr::column(2, "ShopId", Some(ColumnType::Int))));
    }

    #[test]
    fn test_projected_leaves_skip_promoted() {
        let select = table_select();
        let entity = match &select.from {
            Source::Table(t) => t.entity.clone(),
            _ => unreachable!(),
        };
        let shape = Shape::Entity {
            columns: entity.columns().iter().map(|c| (c.name.clone(), SqlExpr::column(1, c.name.clone(), Some(c.ty)))).collect(),
            entity,
        };
        assert_eq!(shape.leaves().len(), 7);
        assert_eq!(shape.projected_leaves().len(), 6);
    }
}
