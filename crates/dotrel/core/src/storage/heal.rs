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

//! Self-healing of missing tables.
//!
//! Definitions come from a pluggable [`SchemaDefinitionSource`]; without one
//! the engine never issues DDL. Tables in the reserved shared schema are
//! never created.

use crate::error::{PersistenceError, PersistenceResult};
use crate::query::SqlCommand;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// DDL definitions keyed by table name
#[cfg_attr(test, mockall::automock)]
pub trait SchemaDefinitionSource: Send + Sync {
    fn definition(&self, table: &str) -> Option<String>;
}

/// Reads `<dir>/<Table>.sql`
#[derive(Debug, Clone)]
pub struct FileDefinitionSource {
    dir: PathBuf,
}

impl FileDefinitionSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SchemaDefinitionSource for FileDefinitionSource {
    fn definition(&self, table: &str) -> Option<String> {
        let path = self.dir.join(format!("{table}.sql"));
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no schema definition");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct SelfHealer {
    source: Option<Arc<dyn SchemaDefinitionSource>>,
    shared_schema: String,
}

impl fmt::Debug for SelfHealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfHealer")
            .field("enabled", &self.source.is_some())
            .field("shared_schema", &self.shared_schema)
            .finish()
    }
}

impl SelfHealer {
    pub fn new(source: Option<Arc<dyn SchemaDefinitionSource>>, shared_schema: impl Into<String>) -> Self {
        Self {
            source,
            shared_schema: shared_schema.into(),
        }
    }

    pub fn disabled(shared_schema: impl Into<String>) -> Self {
        Self::new(None, shared_schema)
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// DDL creating `table` in `schema`
    pub fn script(&self, schema: &str, table: &str) -> PersistenceResult<SqlCommand> {
        if schema.eq_ignore_ascii_case(&self.shared_schema) {
            return Err(PersistenceError::SelfHealRefused {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }
        let definition = self
            .source
            .as_ref()
            .and_then(|source| source.definition(table))
            .ok_or_else(|| PersistenceError::DefinitionMissing(table.to_string()))?;
        Ok(SqlCommand::new(definition.replace(SCHEMA_PLACEHOLDER, schema)))
    }
}
