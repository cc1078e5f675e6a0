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

//! # Storage
//!
//! Hybrid row + document persistence over an external driver.
//!
//! - `driver`: connection seam implemented by the hosting application
//! - `fault`: transient and schema drift classification of driver faults
//! - `retry`: bounded exponential backoff
//! - `metadata`: per (schema, table) column cache
//! - `heal`: optional creation of missing tables from definitions
//! - `statements`: write statements and batch scripts
//! - `store`, `repository`, `batch`: the engine itself

pub mod batch;
pub mod clock;
pub mod driver;
pub mod fault;
pub mod heal;
pub mod metadata;
pub mod repository;
pub mod retry;
pub mod statements;
pub mod store;

use dotrel_common::TenantContext;
use tokio_util::sync::CancellationToken;

pub use batch::{BatchEngine, BatchError, BatchResult, UnitOfWork};
pub use clock::{Clock, SystemClock};
pub use driver::{Connection, Database, DbError, Row};
pub use fault::FaultKind;
pub use heal::{FileDefinitionSource, SchemaDefinitionSource, SelfHealer};
pub use metadata::{MetadataCache, MetadataError, TableMetadata};
pub use repository::{Page, Repository};
pub use retry::RetryPolicy;
pub use store::Store;

/// Per call context: active tenant and a cancellation token
#[derive(Debug, Clone)]
pub struct CallContext {
    pub tenant: TenantContext,
    pub cancellation: CancellationToken,
}

impl CallContext {
    pub fn new(tenant: TenantContext) -> Self {
        Self {
            tenant,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn schema(&self) -> &str {
        self.tenant.schema()
    }

    pub fn username(&self) -> &str {
        self.tenant.username()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
