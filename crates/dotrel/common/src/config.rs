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

//! Configuration management for the persistence engine

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How caller supplied values reach the generated command text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterMode {
    /// Values are rendered as `@pN` placeholders and returned alongside the text
    #[default]
    Bound,
    /// Values are rendered as literals
    Inline,
}

impl FromStr for ParameterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bound" => Ok(ParameterMode::Bound),
            "inline" => Ok(ParameterMode::Inline),
            other => Err(format!("unknown parameter mode '{other}'")),
        }
    }
}

/// Configuration for the query compiler and persistence engine
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Attempts made for an operation failing with a transient fault
    pub retry_max_attempts: u32,

    /// Base delay of the exponential retry backoff
    pub retry_base_delay: Duration,

    /// Attempts made while table metadata reports a wrong identity column count
    pub metadata_max_attempts: u32,

    /// Fixed delay between metadata reads
    pub metadata_retry_delay: Duration,

    /// Maximum combined upserts and deletes accepted by one batch
    pub batch_max_items: usize,

    /// Reserved schema whose tables are never created automatically
    pub shared_schema: String,

    /// Directory holding `<Table>.sql` definitions used for self-healing
    pub schema_definitions_dir: Option<PathBuf>,

    /// Literal rendering mode of generated queries
    pub parameter_mode: ParameterMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(600),
            metadata_max_attempts: 5,
            metadata_retry_delay: Duration::from_millis(200),
            batch_max_items: 250,
            shared_schema: "shared".to_string(),
            schema_definitions_dir: None,
            parameter_mode: ParameterMode::Bound,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_max_attempts: env::var("DOTREL_RETRY_MAX_ATTEMPTS").map(|v| v.parse().unwrap_or(defaults.retry_max_attempts)).unwrap_or(defaults.retry_max_attempts),

            retry_base_delay: env::var("DOTREL_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),

            metadata_max_attempts: env::var("DOTREL_METADATA_MAX_ATTEMPTS").map(|v| v.parse().unwrap_or(defaults.metadata_max_attempts)).unwrap_or(defaults.metadata_max_attempts),

            metadata_retry_delay: env::var("DOTREL_METADATA_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.metadata_retry_delay),

            batch_max_items: env::var("DOTREL_BATCH_MAX_ITEMS").map(|v| v.parse().unwrap_or(defaults.batch_max_items)).unwrap_or(defaults.batch_max_items),

            shared_schema: env::var("DOTREL_SHARED_SCHEMA").unwrap_or(defaults.shared_schema),

            schema_definitions_dir: env::var("DOTREL_SCHEMA_DEFINITIONS_DIR").ok().map(PathBuf::from),

            parameter_mode: env::var("DOTREL_PARAMETER_MODE").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.parameter_mode),
        }
    }

    /// Configuration without retry delays, for tests and tooling
    pub fn without_delays() -> Self {
        Self {
            retry_base_delay: Duration::ZERO,
            metadata_retry_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(600));
        assert_eq!(config.batch_max_items, 250);
        assert_eq!(config.parameter_mode, ParameterMode::Bound);
    }

    #[test]
    fn test_parameter_mode_parse() {
        assert_eq!("Inline".parse::<ParameterMode>(), Ok(ParameterMode::Inline));
        assert_eq!(" bound ".parse::<ParameterMode>(), Ok(ParameterMode::Bound));
        assert!("literal".parse::<ParameterMode>().is_err());
    }
}
