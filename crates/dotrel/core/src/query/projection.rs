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

//! Row projection.
//!
//! A [`Projector`] is compiled once per query from the final shape and maps
//! each result row, by ordinal, into entities, scalars or tuples.

use super::ir::{ProjectionExpr, Select, Shape, SqlExpr};
use super::{QueryError, QueryResult};
use crate::entity::{
    CHANGED_BY_COLUMN, CHANGED_TIMESTAMP_COLUMN, CREATED_BY_COLUMN, CREATED_TIMESTAMP_COLUMN, ColumnRole, DOCUMENT_COLUMN, Entity, EntityDescriptor,
};
use dotrel_common::Value;
use std::fmt;
use std::sync::Arc;

type ProjectFn = Arc<dyn Fn(&[Value]) -> QueryResult<ProjectedValue> + Send + Sync>;

/// Materialization columns of one entity read from a row
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    entity: Arc<EntityDescriptor>,
    values: Vec<(String, Value)>,
}

impl EntityRow {
    pub fn new(entity: Arc<EntityDescriptor>, values: Vec<(String, Value)>) -> Self {
        Self { entity, values }
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn id(&self) -> QueryResult<i64> {
        let column = &self.entity.id_column().name;
        let value = self
            .get(column)
            .ok_or_else(|| QueryError::Materialization(format!("row of {} has no {column}", self.entity.name())))?;
        Ok(value.as_i64()?)
    }

    /// Deserialize the document, then overlay the identity and audit columns
    pub fn into_entity<E: Entity>(self) -> QueryResult<E> {
        let document = self
            .get(DOCUMENT_COLUMN)
            .ok_or_else(|| QueryError::Materialization(format!("row of {} has no document", self.entity.name())))?
            .as_str()?;
        let mut entity: E = serde_json::from_str(document).map_err(|e| QueryError::Materialization(format!("{}: {e}", self.entity.name())))?;

        let record = entity.record_mut();
        record.id = self.id()?;
        if let Some(value) = self.get(CREATED_BY_COLUMN) {
            record.created_by = value.as_optional_text()?;
        }
        if let Some(value) = self.get(CHANGED_BY_COLUMN) {
            record.changed_by = value.as_optional_text()?;
        }
        if let Some(value) = self.get(CREATED_TIMESTAMP_COLUMN) {
            record.created_timestamp = value.as_offset_datetime()?;
        }
        if let Some(value) = self.get(CHANGED_TIMESTAMP_COLUMN) {
            record.changed_timestamp = value.as_offset_datetime()?;
        }
        Ok(entity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectedValue {
    Entity(EntityRow),
    Scalar(Value),
    Tuple(Vec<(String, ProjectedValue)>),
}

impl ProjectedValue {
    pub fn into_entity<E: Entity>(self) -> QueryResult<E> {
        match self {
            ProjectedValue::Entity(row) => row.into_entity(),
            other => Err(QueryError::Materialization(format!("expected an entity, got {other:?}"))),
        }
    }

    pub fn into_scalar(self) -> QueryResult<Value> {
        match self {
            ProjectedValue::Scalar(value) => Ok(value),
            other => Err(QueryError::Materialization(format!("expected a scalar, got {other:?}"))),
        }
    }

    pub fn member(&self, name: &str) -> Option<&ProjectedValue> {
        match self {
            ProjectedValue::Tuple(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn into_member(self, name: &str) -> Option<ProjectedValue> {
        match self {
            ProjectedValue::Tuple(members) => members.into_iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Projector {
    width: usize,
    project: ProjectFn,
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector").field("width", &self.width).finish()
    }
}

impl Projector {
    pub fn build(projection: &ProjectionExpr) -> QueryResult<Self> {
        Ok(Self {
            width: projection.select.columns.len(),
            project: compile(&projection.shape, &projection.select)?,
        })
    }

    /// Number of columns every row must carry
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn project(&self, row: &[Value]) -> QueryResult<ProjectedValue> {
        if row.len() < self.width {
            return Err(QueryError::Materialization(format!("row has {} columns, expected {}", row.len(), self.width)));
        }
        (self.project)(row)
    }
}

fn ordinal(expr: &SqlExpr, select: &Select) -> QueryResult<usize> {
    match expr {
        SqlExpr::Column(c) if c.alias == select.alias => select
            .columns
            .iter()
            .position(|d| d.name == c.name)
            .ok_or_else(|| QueryError::Invariant(format!("projected column {} is missing", c.name))),
        other => Err(QueryError::Invariant(format!("projection leaf {other:?} is not a column of the result"))),
    }
}

fn compile(shape: &Shape, select: &Select) -> QueryResult<ProjectFn> {
    match shape {
        Shape::Scalar(expr) => {
            let at = ordinal(expr, select)?;
            Ok(Arc::new(move |row: &[Value]| -> QueryResult<ProjectedValue> { Ok(ProjectedValue::Scalar(row[at].clone())) }))
        }
        Shape::Entity { entity, columns } => {
            let mut ordinals = Vec::new();
            for (name, expr) in columns {
                if entity.column(name).is_some_and(|c| c.role == ColumnRole::Promoted) {
                    continue;
                }
                ordinals.push((name.clone(), ordinal(expr, select)?));
            }
            let identity = ordinals.iter().find(|(name, _)| *name == entity.id_column().name).map(|(_, at)| *at);
            let entity = entity.clone();
            Ok(Arc::new(move |row: &[Value]| -> QueryResult<ProjectedValue> {
                // an unmatched outer join side has no identity
                if identity.is_some_and(|at| row[at].is_null()) {
                    return Ok(ProjectedValue::Scalar(Value::Null));
                }
                let values = ordinals.iter().map(|(name, at)| (name.clone(), row[*at].clone())).collect();
                Ok(ProjectedValue::Entity(EntityRow::new(entity.clone(), values)))
            }))
        }
        Shape::Tuple(members) => {
            let members = members
                .iter()
                .map(|(name, shape)| Ok((name.clone(), compile(shape, select)?)))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok(Arc::new(move |row: &[Value]| -> QueryResult<ProjectedValue> {
                members
                    .iter()
                    .map(|(name, project)| Ok((name.clone(), project(row)?)))
                    .collect::<QueryResult<Vec<_>>>()
                    .map(ProjectedValue::Tuple)
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnType, EntityRecord};
    use crate::query::ir::{ColumnDecl, Source, TableRef};
    use chrono::DateTime;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Shop {
        #[serde(flatten)]
        record: EntityRecord,
        name: String,
    }

    impl Entity for Shop {
        fn descriptor() -> Arc<EntityDescriptor> {
            Arc::new(EntityDescriptor::new("Shop").promote("Region", ColumnType::Text))
        }

        fn record(&self) -> &EntityRecord {
            &self.record
        }

        fn record_mut(&mut self) -> &mut EntityRecord {
            &mut self.record
        }
    }

    fn entity_projection() -> ProjectionExpr {
        let entity = Shop::descriptor();
        let columns: Vec<ColumnDecl> = entity
            .columns()
            .iter()
            .map(|c| ColumnDecl::new(c.name.clone(), SqlExpr::column(0, c.name.clone(), Some(c.ty))))
            .collect();
        let shape = Shape::Tuple(vec![
            (
                "Shop".to_string(),
                Shape::Entity {
                    entity: entity.clone(),
                    columns: entity.columns().iter().map(|c| (c.name.clone(), SqlExpr::column(1, c.name.clone(), Some(c.ty)))).collect(),
                },
            ),
            ("Region".to_string(), Shape::Scalar(SqlExpr::column(1, "Region", Some(ColumnType::Text)))),
        ]);
        ProjectionExpr {
            select: Select::new(1, columns, Source::Table(TableRef { alias: 0, entity })),
            shape,
        }
    }

    fn row(id: Value) -> Vec<Value> {
        let stamp = DateTime::parse_from_rfc3339("2025-01-02T03:04:05+07:00").unwrap();
        vec![
            id,
            Value::from(r#"{"Id":0,"name":"Main","CreatedBy":"forged"}"#),
            Value::from("alice"),
            Value::from("bob"),
            Value::DateTimeOffset(stamp),
            Value::DateTimeOffset(stamp),
            Value::from("North"),
        ]
    }

    #[test]
    fn test_projects_by_ordinal() {
        let projector = Projector::build(&entity_projection()).unwrap();
        assert_eq!(projector.width(), 7);
        let projected = projector.project(&row(Value::Int(12))).unwrap();
        assert_eq!(projected.member("Region"), Some(&ProjectedValue::Scalar(Value::from("North"))));

        let shop: Shop = projected.into_member("Shop").unwrap().into_entity().unwrap();
        assert_eq!(shop.name, "Main");
        assert_eq!(shop.record.id, 12);
        assert_eq!(shop.record.created_by.as_deref(), Some("alice"));
        assert_eq!(shop.record.changed_by.as_deref(), Some("bob"));
        assert!(shop.record.created_timestamp.is_some());
    }

    #[test]
    fn test_missing_outer_join_side_is_null() {
        let projector = Projector::build(&entity_projection()).unwrap();
        let projected = projector.project(&row(Value::Null)).unwrap();
        assert_eq!(projected.member("Shop"), Some(&ProjectedValue::Scalar(Value::Null)));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let projector = Projector::build(&entity_projection()).unwrap();
        assert!(matches!(projector.project(&[Value::Int(1)]), Err(QueryError::Materialization(_))));
    }
}
