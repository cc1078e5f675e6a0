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

//! # Query Compilation
//!
//! Turns an operator chain built with [`Query`] into dialect text and a row
//! projector.
//!
//! ## Pipeline
//!
//! 1. **Partial evaluation**: parameter-free subtrees fold into constants
//! 2. **Binding**: recognized operators become relational IR
//! 3. **Optimization**: ordering hoisting, redundant subquery removal,
//!    subquery merging and unused column pruning
//! 4. **Paging**: `OFFSET`/`FETCH` with a guaranteed ordering
//! 5. **Formatting** and **projection** of the final select

pub mod binder;
pub mod builder;
pub mod compiler;
pub mod evaluator;
pub mod expr;
pub mod formatter;
pub mod ir;
pub mod optimizer;
pub mod paging;
pub mod projection;

use dotrel_common::ValueError;
use thiserror::Error;

pub use builder::{AggregateKind, JoinKind, Query, QueryExpr, SimpleQuery};
pub use compiler::{CompiledQuery, QueryCompiler};
pub use expr::{field, lit, local, param, tuple, BinaryOp, Expr, IntoExpr, Lambda, Method};
pub use formatter::SqlCommand;
pub use paging::PageRequest;
pub use projection::{EntityRow, ProjectedValue, Projector};

/// Translation faults. These are raised immediately and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Unsupported expression: {0}")]
    Unsupported(String),
    #[error("Unknown member '{member}' on {target}")]
    UnknownMember { target: String, member: String },
    #[error("Ambiguous aggregate target: {0}")]
    AmbiguousAggregate(String),
    #[error("Invalid paging: {0}")]
    InvalidPaging(String),
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] ValueError),
    #[error("Materialization failed: {0}")]
    Materialization(String),
    #[error("Invalid query structure: {0}")]
    Invariant(String),
}

pub type QueryResult<T> = Result<T, QueryError>;
