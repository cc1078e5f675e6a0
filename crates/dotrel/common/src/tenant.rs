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

//! Tenant context supplied by the hosting application.
//!
//! The schema name is interpolated into generated command text, so it must
//! come from trusted configuration and never from end-user input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database the tenant's connections are opened against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Logical name used in logs
    pub name: String,
    /// Driver specific connection string
    pub connection_string: String,
}

impl ConnectionTarget {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Active tenant for a call: schema, connection target and acting user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub schema: String,
    pub connection: ConnectionTarget,
    pub username: String,
}

impl TenantContext {
    pub fn new(schema: impl Into<String>, connection: ConnectionTarget, username: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            connection,
            username: username.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}
