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

use super::CallContext;
use crate::error::{PersistenceError, PersistenceResult};
use dotrel_common::StoreConfig;
use metrics::counter;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for transient faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.retry_max_attempts, config.retry_base_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt (1-based): base, 2×base, 4×base, …
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `attempt` until it succeeds, fails with a non-transient fault, or
    /// the attempts run out. Cancellation is checked before every attempt.
    pub async fn run<T, F, Fut>(&self, ctx: &CallContext, operation: &str, mut attempt: F) -> PersistenceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PersistenceResult<T>>,
    {
        let mut attempts = 0;
        loop {
            if ctx.is_cancelled() {
                return Err(PersistenceError::Cancelled);
            }
            attempts += 1;

            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_transient() {
                return Err(error);
            }
            if attempts >= self.max_attempts {
                return Err(PersistenceError::RetryExhausted {
                    attempts,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_after(attempts);
            warn!(operation, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %error, "transient fault, retrying");
            counter!("dotrel_retries_total", 1);
            tokio::select! {
                _ = ctx.cancellation.cancelled() => return Err(PersistenceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}
