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

//! Catalog metadata for the tables written by the engine.
//!
//! Write statements are built from the live column list, so a promoted
//! column added to a table is picked up without code changes. Entries live
//! for the process lifetime unless invalidated (self-healing does so after
//! creating a table).

use super::driver::{Connection, DbError, Row};
use crate::query::formatter::qualified_table;
use crate::query::SqlCommand;
use dotrel_common::{StoreConfig, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CATALOG_QUERY: &str = "SELECT c.[name], t.[name] AS [type_name], c.[is_identity], c.[is_computed], c.[is_nullable] \
     FROM sys.columns AS c INNER JOIN sys.types AS t ON c.[user_type_id] = t.[user_type_id] \
     WHERE c.[object_id] = OBJECT_ID(@p0) ORDER BY c.[column_id]";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Table {schema}.{table} does not exist")]
    TableMissing { schema: String, table: String },
    #[error("Table {schema}.{table} reports {found} identity columns after {attempts} reads")]
    IdentityCount { schema: String, table: String, found: usize, attempts: u32 },
    #[error("Malformed catalog row for {table}: {reason}")]
    Malformed { table: String, reason: String },
    #[error("Catalog read failed: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
    pub is_identity: bool,
    pub is_computed: bool,
    pub is_nullable: bool,
}

impl ColumnMetadata {
    fn from_row(table: &str, row: &Row) -> Result<Self, MetadataError> {
        let malformed = |reason: String| MetadataError::Malformed {
            table: table.to_string(),
            reason,
        };
        let [name, type_name, identity, computed, nullable] = row.as_slice() else {
            return Err(malformed(format!("expected 5 values, got {}", row.len())));
        };
        let text = |v: &Value| v.as_str().map(str::to_string).map_err(|e| malformed(e.to_string()));
        let flag = |v: &Value| v.as_bool().map_err(|e| malformed(e.to_string()));
        Ok(Self {
            name: text(name)?,
            type_name: text(type_name)?,
            is_identity: flag(identity)?,
            is_computed: flag(computed)?,
            is_nullable: flag(nullable)?,
        })
    }

    pub fn is_writable(&self) -> bool {
        !self.is_identity && !self.is_computed
    }
}

/// Column list of one table, with exactly one identity column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    schema: String,
    table: String,
    columns: Vec<ColumnMetadata>,
    identity: usize,
}

impl TableMetadata {
    /// Fails with the number of identity columns found when it is not one
    pub fn new(schema: impl Into<String>, table: impl Into<String>, columns: Vec<ColumnMetadata>) -> Result<Self, usize> {
        let identities: Vec<usize> = columns.iter().enumerate().filter(|(_, c)| c.is_identity).map(|(i, _)| i).collect();
        match identities.as_slice() {
            [identity] => Ok(Self {
                schema: schema.into(),
                table: table.into(),
                identity: *identity,
                columns,
            }),
            other => Err(other.len()),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn identity(&self) -> &ColumnMetadata {
        &self.columns[self.identity]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn writable(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_writable())
    }
}

pub fn catalog_command(schema: &str, table: &str) -> SqlCommand {
    SqlCommand::with_params(CATALOG_QUERY, vec![Value::Text(qualified_table(schema, table))])
}

type TableKey = (String, String);

/// Process-wide metadata cache keyed by (schema, table)
#[derive(Debug)]
pub struct MetadataCache {
    entries: RwLock<HashMap<TableKey, Arc<TableMetadata>>>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl MetadataCache {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.metadata_max_attempts, config.metadata_retry_delay)
    }

    pub fn cached(&self, schema: &str, table: &str) -> Option<Arc<TableMetadata>> {
        self.entries.read().get(&(schema.to_string(), table.to_string())).cloned()
    }

    /// Cached metadata, read from the catalog on a miss. Concurrent misses
    /// may both read; the first insert wins.
    pub async fn get(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<Arc<TableMetadata>, MetadataError> {
        if let Some(hit) = self.cached(schema, table) {
            return Ok(hit);
        }

        let loaded = Arc::new(self.load(conn, schema, table).await?);
        let mut entries = self.entries.write();
        Ok(entries.entry((schema.to_string(), table.to_string())).or_insert(loaded).clone())
    }

    async fn load(&self, conn: &mut dyn Connection, schema: &str, table: &str) -> Result<TableMetadata, MetadataError> {
        let command = catalog_command(schema, table);
        let mut found = 0;

        for attempt in 1..=self.max_attempts {
            let rows = conn.query(&command).await?;
            if rows.is_empty() {
                return Err(MetadataError::TableMissing {
                    schema: schema.to_string(),
                    table: table.to_string(),
                });
            }
            let columns = rows.iter().map(|row| ColumnMetadata::from_row(table, row)).collect::<Result<Vec<_>, _>>()?;

            match TableMetadata::new(schema, table, columns) {
                Ok(metadata) => {
                    debug!(schema, table, columns = metadata.columns().len(), "loaded table metadata");
                    return Ok(metadata);
                }
                Err(count) => {
                    found = count;
                    if attempt < self.max_attempts {
                        warn!(schema, table, identities = count, attempt, "unexpected identity column count, re-reading metadata");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(MetadataError::IdentityCount {
            schema: schema.to_string(),
            table: table.to_string(),
            found,
            attempts: self.max_attempts,
        })
    }

    pub fn invalidate(&self, schema: &str, table: &str) -> bool {
        self.entries.write().remove(&(schema.to_string(), table.to_string())).is_some()
    }

    pub fn invalidate_schema(&self, schema: &str) {
        self.entries.write().retain(|(s, _), _| s != schema);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
