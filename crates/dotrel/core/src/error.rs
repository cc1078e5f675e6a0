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

use crate::query::QueryError;
use crate::storage::driver::DbError;
use crate::storage::fault::FaultKind;
use crate::storage::metadata::MetadataError;
use thiserror::Error;

/// Repository level failure
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Query translation failed: {0}")]
    Query(#[from] QueryError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<PersistenceError>,
    },
    #[error("No row in {table} with id {id}")]
    NotFound { table: String, id: i64 },
    #[error("Refusing to create {table} in reserved schema {schema}")]
    SelfHealRefused { schema: String, table: String },
    #[error("No schema definition for {0}")]
    DefinitionMissing(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Mapping failed: {0}")]
    Mapping(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl PersistenceError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            PersistenceError::Db(e) => e.kind(),
            PersistenceError::Metadata(MetadataError::Db(e)) => e.kind(),
            PersistenceError::Metadata(MetadataError::TableMissing { .. }) => FaultKind::MissingTable,
            _ => FaultKind::Other,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.fault_kind() == FaultKind::Transient
    }

    /// Missing table or column
    pub fn is_schema_drift(&self) -> bool {
        matches!(self.fault_kind(), FaultKind::MissingTable | FaultKind::MissingColumn)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Mapping(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_through_wrappers() {
        let deadlock = PersistenceError::Db(DbError::new(Some(1205), "Transaction was deadlocked"));
        assert!(deadlock.is_transient());
        assert!(!deadlock.is_schema_drift());

        let missing = PersistenceError::Metadata(MetadataError::TableMissing {
            schema: "tenant".into(),
            table: "Session".into(),
        });
        assert!(missing.is_schema_drift());

        let exhausted = PersistenceError::RetryExhausted {
            attempts: 5,
            source: Box::new(deadlock),
        };
        assert!(!exhausted.is_transient());
        assert!(exhausted.to_string().contains("5 attempts"));
    }
}
