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

use super::driver::DbError;
use serde::{Deserialize, Serialize};

/// Driver codes for faults that clear up on their own
pub const TRANSIENT_CODES: &[i32] = &[
    -2, 20, 64, 233, 1205, 4060, 10053, 10054, 10060, 10928, 10929, 40143, 40197, 40501, 40540, 40613, 49918, 49919, 49920,
];

pub const MISSING_TABLE_CODE: i32 = 208;
pub const MISSING_COLUMN_CODE: i32 = 207;

const TRANSIENT_MESSAGES: &[&str] = &["deadlock", "timeout", "timed out", "try again later", "retry later"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Retried with backoff
    Transient,
    /// Healed once from a schema definition
    MissingTable,
    MissingColumn,
    Other,
}

pub fn classify(error: &DbError) -> FaultKind {
    let message = error.message.to_ascii_lowercase();
    match error.code {
        Some(code) if TRANSIENT_CODES.contains(&code) => FaultKind::Transient,
        Some(MISSING_TABLE_CODE) => FaultKind::MissingTable,
        Some(MISSING_COLUMN_CODE) => FaultKind::MissingColumn,
        _ if message.contains("invalid object name") => FaultKind::MissingTable,
        _ if message.contains("invalid column name") => FaultKind::MissingColumn,
        _ if TRANSIENT_MESSAGES.iter().any(|m| message.contains(m)) => FaultKind::Transient,
        _ => FaultKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(classify(&DbError::with_code(1205, "chosen as victim")), FaultKind::Transient);
        assert_eq!(classify(&DbError::with_code(-2, "")), FaultKind::Transient);
        assert_eq!(classify(&DbError::with_code(208, "Invalid object name 'tenant.Session'")), FaultKind::MissingTable);
        assert_eq!(classify(&DbError::with_code(207, "Invalid column name 'Till'")), FaultKind::MissingColumn);
        assert_eq!(classify(&DbError::with_code(2627, "Violation of PRIMARY KEY constraint")), FaultKind::Other);
    }

    #[test]
    fn test_messages() {
        assert_eq!(classify(&DbError::new(None, "Deadlock detected")), FaultKind::Transient);
        assert_eq!(classify(&DbError::new(None, "Connection Timed Out")), FaultKind::Transient);
        assert_eq!(classify(&DbError::new(None, "service busy, retry later")), FaultKind::Transient);
        assert_eq!(classify(&DbError::new(None, "Invalid object name 'x'")), FaultKind::MissingTable);
        assert_eq!(classify(&DbError::new(None, "syntax error")), FaultKind::Other);
    }
}
