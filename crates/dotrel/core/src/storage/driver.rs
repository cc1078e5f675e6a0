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

//! Database driver seam.
//!
//! The engine never talks to a concrete driver. Each logical call opens its
//! own [`Connection`] through a [`Database`] and releases it when done;
//! transactions never span calls.

use crate::query::SqlCommand;
use async_trait::async_trait;
use dotrel_common::{ConnectionTarget, Value};
use std::fmt;

use super::fault::{classify, FaultKind};

/// Result row, read by ordinal
pub type Row = Vec<Value>;

/// Fault reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub code: Option<i32>,
    pub message: String,
}

impl DbError {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self::new(Some(code), message)
    }

    pub fn kind(&self) -> FaultKind {
        classify(self)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}

#[async_trait]
pub trait Connection: Send {
    /// Run a command returning rows
    async fn query(&mut self, command: &SqlCommand) -> Result<Vec<Row>, DbError>;

    /// Run a command returning the affected row count
    async fn execute(&mut self, command: &SqlCommand) -> Result<u64, DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn Connection>, DbError>;
}
