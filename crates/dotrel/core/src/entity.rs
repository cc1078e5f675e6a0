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

//! # Entities
//!
//! Entities are stored as a row holding the identity key, the full
//! serialized document, the audit columns and any columns promoted out of
//! the document for filtering and sorting. An [`EntityDescriptor`] names that
//! row shape; the [`Entity`] trait connects a Rust type to its descriptor.

use chrono::{DateTime, FixedOffset};
use dotrel_common::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub const DOCUMENT_COLUMN: &str = "Document";
pub const CREATED_BY_COLUMN: &str = "CreatedBy";
pub const CHANGED_BY_COLUMN: &str = "ChangedBy";
pub const CREATED_TIMESTAMP_COLUMN: &str = "CreatedTimestamp";
pub const CHANGED_TIMESTAMP_COLUMN: &str = "ChangedTimestamp";

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Bool,
    Text,
    Float,
    Date,
    DateTime,
    DateTimeOffset,
    Guid,
    Enum,
}

impl ColumnType {
    /// Column type a literal value would occupy
    pub fn of(value: &Value) -> Option<ColumnType> {
        match value {
            Value::Null | Value::List(_) => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int(_) => Some(ColumnType::Int),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Enum(_) => Some(ColumnType::Enum),
            Value::Date(_) => Some(ColumnType::Date),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::DateTimeOffset(_) => Some(ColumnType::DateTimeOffset),
            Value::Guid(_) => Some(ColumnType::Guid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRole {
    Identity,
    Document,
    Audit,
    Promoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub role: ColumnRole,
}

/// Schema an entity's table lives in
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchemaScope {
    /// The active tenant's schema
    #[default]
    Tenant,
    /// A reserved schema shared by every tenant
    Shared(String),
}

/// Row shape of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    scope: SchemaScope,
    columns: Vec<ColumnDef>,
}

impl EntityDescriptor {
    /// Descriptor with the identity, document and audit columns of `name`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let standard = |column: &str, ty, nullable, role| ColumnDef {
            name: column.to_string(),
            ty,
            nullable,
            role,
        };
        let columns = vec![
            standard(&format!("{name}Id"), ColumnType::Int, false, ColumnRole::Identity),
            standard(DOCUMENT_COLUMN, ColumnType::Text, false, ColumnRole::Document),
            standard(CREATED_BY_COLUMN, ColumnType::Text, true, ColumnRole::Audit),
            standard(CHANGED_BY_COLUMN, ColumnType::Text, true, ColumnRole::Audit),
            standard(CREATED_TIMESTAMP_COLUMN, ColumnType::DateTimeOffset, true, ColumnRole::Audit),
            standard(CHANGED_TIMESTAMP_COLUMN, ColumnType::DateTimeOffset, true, ColumnRole::Audit),
        ];

        Self {
            table: name.clone(),
            name,
            scope: SchemaScope::Tenant,
            columns,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn shared(mut self, schema: impl Into<String>) -> Self {
        self.scope = SchemaScope::Shared(schema.into());
        self
    }

    /// Add a non-nullable column mirrored from the document
    pub fn promote(self, column: impl Into<String>, ty: ColumnType) -> Self {
        self.promote_column(column.into(), ty, false)
    }

    pub fn promote_nullable(self, column: impl Into<String>, ty: ColumnType) -> Self {
        self.promote_column(column.into(), ty, true)
    }

    fn promote_column(mut self, name: String, ty: ColumnType, nullable: bool) -> Self {
        if self.columns.iter().any(|c| c.name == name && c.role != ColumnRole::Promoted) {
            return self;
        }
        self.columns.retain(|c| c.name != name);
        self.columns.push(ColumnDef {
            name,
            ty,
            nullable,
            role: ColumnRole::Promoted,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn scope(&self) -> &SchemaScope {
        &self.scope
    }

    /// Schema the table resolves to for the given tenant schema
    pub fn schema_for<'a>(&'a self, tenant_schema: &'a str) -> &'a str {
        match &self.scope {
            SchemaScope::Tenant => tenant_schema,
            SchemaScope::Shared(schema) => schema,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn id_column(&self) -> &ColumnDef {
        // constructors always place the identity column first
        &self.columns[0]
    }

    /// Columns needed to rebuild an entity from a row
    pub fn materialization_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.role != ColumnRole::Promoted)
    }
}

impl fmt::Display for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.table)
    }
}

/// Identity, correlation key and audit fields shared by every entity.
///
/// The audit fields are server authoritative: they are stamped by the
/// repository and overwritten from the row on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityRecord {
    pub id: i64,
    #[serde(default)]
    pub web_id: Option<Uuid>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub changed_by: Option<String>,
    #[serde(default)]
    pub created_timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub changed_timestamp: Option<DateTime<FixedOffset>>,
}

impl EntityRecord {
    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Correlation key, generated on first use
    pub fn ensure_web_id(&mut self) -> Uuid {
        *self.web_id.get_or_insert_with(Uuid::new_v4)
    }

    pub fn stamp_created(&mut self, user: &str, at: DateTime<FixedOffset>) {
        self.created_by = Some(user.to_string());
        self.created_timestamp = Some(at);
        self.stamp_changed(user, at);
    }

    pub fn stamp_changed(&mut self, user: &str, at: DateTime<FixedOffset>) {
        self.changed_by = Some(user.to_string());
        self.changed_timestamp = Some(at);
    }
}

/// A Rust type persisted as an entity row
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> Arc<EntityDescriptor>;

    fn record(&self) -> &EntityRecord;

    fn record_mut(&mut self) -> &mut EntityRecord;

    /// Values of the promoted columns, keyed by column name
    fn promoted_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

/// Object safe view of an entity, used where entities of different types are mixed
pub trait PersistentEntity: Send + Sync {
    fn entity_descriptor(&self) -> Arc<EntityDescriptor>;

    fn entity_record(&self) -> &EntityRecord;

    fn entity_record_mut(&mut self) -> &mut EntityRecord;

    fn document(&self) -> Result<String, serde_json::Error>;

    fn column_values(&self) -> Vec<(&'static str, Value)>;
}

impl<E: Entity> PersistentEntity for E {
    fn entity_descriptor(&self) -> Arc<EntityDescriptor> {
        E::descriptor()
    }

    fn entity_record(&self) -> &EntityRecord {
        self.record()
    }

    fn entity_record_mut(&mut self) -> &mut EntityRecord {
        self.record_mut()
    }

    fn document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        self.promoted_values()
    }
}

/// Entity types known to a store, registered once at startup
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    by_name: HashMap<String, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.register_descriptor(E::descriptor())
    }

    pub fn register_descriptor(&mut self, descriptor: Arc<EntityDescriptor>) -> &mut Self {
        self.by_name.insert(descriptor.name().to_string(), descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_name.get(name)
    }

    pub fn by_table(&self, table: &str) -> Option<&Arc<EntityDescriptor>> {
        self.by_name.values().find(|d| d.table() == table)
    }

    pub fn contains(&self, descriptor: &EntityDescriptor) -> bool {
        self.by_name.get(descriptor.name()).is_some_and(|d| d.as_ref() == descriptor)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}
