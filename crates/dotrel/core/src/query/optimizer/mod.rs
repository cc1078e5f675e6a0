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

//! Rule based rewriting of bound queries.
//!
//! Passes are applied in registration order, repeatedly, until a full round
//! leaves the projection unchanged.

pub mod columns;
pub mod order_by;
pub mod subquery;

use super::ir::ProjectionExpr;
use super::{QueryError, QueryResult};
use tracing::trace;

pub use columns::UnusedColumnPruning;
pub use order_by::OrderByHoisting;
pub use subquery::{RedundantSubqueryRemoval, SubqueryMerge};

#[derive(Debug, Clone)]
pub struct PassApplication {
    pub pass_name: String,
    pub applied: bool,
    pub iteration: usize,
}

pub trait OptimizerPass: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, projection: &ProjectionExpr) -> QueryResult<ProjectionExpr>;
    fn applicable(&self, projection: &ProjectionExpr) -> bool {
        let _ = projection;
        true
    }
}

pub struct QueryOptimizer {
    passes: Vec<Box<dyn OptimizerPass>>,
    max_iterations: usize,
}

impl QueryOptimizer {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: 16,
        }
    }

    /// Hoisting first, then the collapsing passes, then pruning
    pub fn standard() -> Self {
        let mut optimizer = Self::new();
        optimizer.add_pass(Box::new(OrderByHoisting));
        optimizer.add_pass(Box::new(RedundantSubqueryRemoval));
        optimizer.add_pass(Box::new(SubqueryMerge));
        optimizer.add_pass(Box::new(UnusedColumnPruning));
        optimizer
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizerPass>) {
        self.passes.push(pass);
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) {
        self.max_iterations = max_iterations;
    }

    pub fn optimize(&self, initial: ProjectionExpr) -> QueryResult<(ProjectionExpr, Vec<PassApplication>)> {
        let mut current = initial;
        let mut applications = Vec::new();

        for iteration in 1..=self.max_iterations {
            let mut changed = false;

            for pass in &self.passes {
                if !pass.applicable(&current) {
                    continue;
                }
                let next = pass.apply(&current)?;
                let applied = next != current;
                if applied {
                    trace!(pass = pass.name(), iteration, "optimizer pass rewrote query");
                    current = next;
                    changed = true;
                }
                applications.push(PassApplication {
                    pass_name: pass.name().to_string(),
                    applied,
                    iteration,
                });
            }

            if !changed {
                return Ok((current, applications));
            }
        }

        Err(QueryError::Invariant(format!("optimizer did not settle after {} rounds", self.max_iterations)))
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::standard()
    }
}
