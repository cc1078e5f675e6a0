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

//! # DotRel Common
//!
//! Types shared by the DotRel query compiler and persistence engine:
//! the scalar value model, calendar correction, tenant context,
//! store configuration and logging setup.

pub mod calendar;
pub mod config;
pub mod logging;
pub mod tenant;
pub mod value;

pub use config::{ParameterMode, StoreConfig};
pub use tenant::{ConnectionTarget, TenantContext};
pub use value::{DeclaredEnum, EnumValue, Value, ValueError};
