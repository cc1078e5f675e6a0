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

//! Write statements built from live table metadata.

use super::metadata::TableMetadata;
use crate::entity::{CHANGED_BY_COLUMN, CHANGED_TIMESTAMP_COLUMN, CREATED_BY_COLUMN, CREATED_TIMESTAMP_COLUMN, DOCUMENT_COLUMN, PersistentEntity};
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::formatter::{format_literal, qualified_table, quote_identifier};
use crate::query::SqlCommand;
use dotrel_common::Value;
use uuid::Uuid;

pub const CORRELATION_COLUMN: &str = "WebId";

/// Column values of one entity as written
#[derive(Debug, Clone, PartialEq)]
pub struct RowValues {
    values: Vec<(String, Value)>,
}

impl RowValues {
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }

    /// Document, audit and promoted column values of `entity`
    pub fn of(entity: &dyn PersistentEntity) -> PersistenceResult<Self> {
        let record = entity.entity_record();
        let mut values = vec![
            (DOCUMENT_COLUMN.to_string(), Value::Text(entity.document()?)),
            (CREATED_BY_COLUMN.to_string(), Value::from(record.created_by.clone())),
            (CHANGED_BY_COLUMN.to_string(), Value::from(record.changed_by.clone())),
            (CREATED_TIMESTAMP_COLUMN.to_string(), Value::from(record.created_timestamp)),
            (CHANGED_TIMESTAMP_COLUMN.to_string(), Value::from(record.changed_timestamp)),
        ];
        for (column, value) in entity.column_values() {
            values.retain(|(name, _)| !name.eq_ignore_ascii_case(column));
            values.push((column.to_string(), value));
        }
        Ok(Self { values })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(name, _)| name.eq_ignore_ascii_case(column)).map(|(_, v)| v)
    }

    /// Writable columns of `metadata` this row supplies, in table order
    fn writable<'a>(&'a self, metadata: &'a TableMetadata) -> impl Iterator<Item = (&'a str, &'a Value)> {
        metadata.writable().filter_map(|column| self.get(&column.name).map(|value| (column.name.as_str(), value)))
    }
}

fn table_name(metadata: &TableMetadata) -> String {
    qualified_table(metadata.schema(), metadata.table())
}

/// `INSERT … OUTPUT INSERTED.[Id] VALUES (…)`. With a correlation key the
/// output row also carries it, so the caller can match generated ids.
pub fn insert(metadata: &TableMetadata, row: &RowValues, correlation: Option<Uuid>) -> PersistenceResult<SqlCommand> {
    let (columns, mut params): (Vec<String>, Vec<Value>) = row.writable(metadata).map(|(name, value)| (quote_identifier(name), value.to_wire())).unzip();
    if columns.is_empty() {
        return Err(PersistenceError::Mapping(format!("no writable column of {} is supplied", metadata.table())));
    }
    let placeholders: Vec<String> = (0..params.len()).map(|i| format!("@p{i}")).collect();

    let mut output = format!("INSERTED.{}", quote_identifier(&metadata.identity().name));
    if let Some(key) = correlation {
        output = format!("@p{} AS {}, {output}", params.len(), quote_identifier(CORRELATION_COLUMN));
        params.push(Value::Guid(key));
    }

    let text = format!(
        "INSERT INTO {} ({}) OUTPUT {output} VALUES ({})",
        table_name(metadata),
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok(SqlCommand::with_params(text, params))
}

/// `UPDATE … SET … WHERE [Id] = @pN`; creation audit columns are never written
pub fn update(metadata: &TableMetadata, row: &RowValues, id: i64) -> PersistenceResult<SqlCommand> {
    let mut params = Vec::new();
    let mut assignments = Vec::new();
    for (name, value) in row.writable(metadata) {
        if name.eq_ignore_ascii_case(CREATED_BY_COLUMN) || name.eq_ignore_ascii_case(CREATED_TIMESTAMP_COLUMN) {
            continue;
        }
        assignments.push(format!("{} = @p{}", quote_identifier(name), params.len()));
        params.push(value.to_wire());
    }
    if assignments.is_empty() {
        return Err(PersistenceError::Mapping(format!("no updatable column of {} is supplied", metadata.table())));
    }

    let text = format!(
        "UPDATE {} SET {} WHERE {} = @p{}",
        table_name(metadata),
        assignments.join(", "),
        quote_identifier(&metadata.identity().name),
        params.len()
    );
    params.push(Value::Int(id));
    Ok(SqlCommand::with_params(text, params))
}

pub fn delete(metadata: &TableMetadata, id: i64) -> SqlCommand {
    let text = format!("DELETE FROM {} WHERE {} = @p0", table_name(metadata), quote_identifier(&metadata.identity().name));
    SqlCommand::with_params(text, vec![Value::Int(id)])
}

/// Command text with every placeholder replaced by its literal
pub fn inline(command: &SqlCommand) -> String {
    // highest index first so @p1 never clobbers @p10
    command
        .params
        .iter()
        .enumerate()
        .rev()
        .fold(command.text.clone(), |text, (i, value)| text.replace(&format!("@p{i}"), &format_literal(value)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Delete,
    Insert,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    pub command: SqlCommand,
}

/// Ordered statements of one batch: deletes, then inserts, then updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchScript {
    statements: Vec<Statement>,
}

impl BatchScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: StatementKind, table: impl Into<String>, command: SqlCommand) {
        self.statements.push(Statement {
            kind,
            table: table.into(),
            command,
        });
        self.statements.sort_by_key(|s| s.kind as u8);
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Whole transactional script with literals inlined
    pub fn render(&self) -> String {
        let mut script = String::from("SET XACT_ABORT ON; BEGIN TRANSACTION;");
        for statement in &self.statements {
            script.push(' ');
            script.push_str(&inline(&statement.command));
            script.push(';');
        }
        script.push_str(" COMMIT TRANSACTION;");
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::metadata::ColumnMetadata;

    fn column(name: &str, identity: bool, computed: bool) -> ColumnMetadata {
        ColumnMetadata {
            name: name.to_string(),
            type_name: "nvarchar".to_string(),
            is_identity: identity,
            is_computed: computed,
            is_nullable: true,
        }
    }

    fn session() -> TableMetadata {
        TableMetadata::new(
            "tenant",
            "Session",
            vec![
                column("SessionId", true, false),
                column("Document", false, false),
                column("CreatedBy", false, false),
                column("ChangedBy", false, false),
                column("CreatedTimestamp", false, false),
                column("ChangedTimestamp", false, false),
                column("ShopId", false, false),
                column("Sort", false, true),
            ],
        )
        .unwrap()
    }

    fn row() -> RowValues {
        RowValues::new(vec![
            ("Document".into(), Value::from("{}")),
            ("CreatedBy".into(), Value::from("ann")),
            ("ChangedBy".into(), Value::from("ann")),
            ("ShopId".into(), Value::Int(4)),
            ("Sort".into(), Value::Int(9)),
            ("Unknown".into(), Value::Int(1)),
        ])
    }

    #[test]
    fn test_insert_uses_writable_supplied_columns() {
        let command = insert(&session(), &row(), None).unwrap();
        assert_eq!(
            command.text,
            "INSERT INTO [tenant].[Session] ([Document], [CreatedBy], [ChangedBy], [ShopId]) OUTPUT INSERTED.[SessionId] VALUES (@p0, @p1, @p2, @p3)"
        );
        assert_eq!(command.params.len(), 4);
    }

    #[test]
    fn test_insert_with_correlation() {
        let key = Uuid::nil();
        let command = insert(&session(), &row(), Some(key)).unwrap();
        assert!(command.text.contains("OUTPUT @p4 AS [WebId], INSERTED.[SessionId]"));
        assert_eq!(command.params[4], Value::Guid(key));
    }

    #[test]
    fn test_update_skips_creation_audit() {
        let command = update(&session(), &row(), 12).unwrap();
        assert_eq!(command.text, "UPDATE [tenant].[Session] SET [Document] = @p0, [ChangedBy] = @p1, [ShopId] = @p2 WHERE [SessionId] = @p3");
        assert_eq!(command.params[3], Value::Int(12));
    }

    #[test]
    fn test_inline_and_render() {
        let mut script = BatchScript::new();
        script.push(StatementKind::Update, "Session", update(&session(), &row(), 3).unwrap());
        script.push(StatementKind::Delete, "Session", delete(&session(), 7));
        assert_eq!(script.statements()[0].kind, StatementKind::Delete);
        assert_eq!(
            script.render(),
            "SET XACT_ABORT ON; BEGIN TRANSACTION; DELETE FROM [tenant].[Session] WHERE [SessionId] = 7; \
             UPDATE [tenant].[Session] SET [Document] = '{}', [ChangedBy] = 'ann', [ShopId] = 4 WHERE [SessionId] = 3; COMMIT TRANSACTION;"
        );

        let wide = SqlCommand::with_params("@p1 @p10", (0..11).map(Value::Int).collect());
        assert_eq!(inline(&wide), "1 10");
    }
}
