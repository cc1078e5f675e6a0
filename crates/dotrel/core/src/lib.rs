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

//! # dotrel core
//!
//! Object query compilation and hybrid row + document persistence.
//!
//! - `entity`: row shape of persisted types and the startup registry
//! - `query`: builder, partial evaluation, binding, optimization, formatting
//! - `storage`: driver seam, metadata cache, retry and self-healing,
//!   per-type repositories and the cross-type batch engine

pub mod entity;
pub mod error;
pub mod query;
pub mod storage;

pub use entity::{ColumnType, Entity, EntityDescriptor, EntityRecord, EntityRegistry, PersistentEntity};
pub use error::{PersistenceError, PersistenceResult};
pub use query::{PageRequest, Query, QueryCompiler, QueryError, SimpleQuery};
pub use storage::{BatchEngine, BatchResult, CallContext, Repository, Store, UnitOfWork};
