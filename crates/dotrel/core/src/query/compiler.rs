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

use super::binder::Binder;
use super::builder::{AggregateKind, QueryExpr};
use super::evaluator::fold_query;
use super::formatter::{Formatter, SqlCommand};
use super::ir::ProjectionExpr;
use super::optimizer::QueryOptimizer;
use super::paging::{apply_paging, expose_ordering, PageRequest};
use super::projection::Projector;
use super::QueryResult;
use dotrel_common::ParameterMode;
use std::sync::Arc;
use tracing::{debug, trace};

/// Command text plus the projector reading its rows
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub command: SqlCommand,
    pub projector: Projector,
}

pub struct QueryCompiler {
    mode: ParameterMode,
    optimizer: QueryOptimizer,
}

impl QueryCompiler {
    pub fn new(mode: ParameterMode) -> Self {
        Self {
            mode,
            optimizer: QueryOptimizer::standard(),
        }
    }

    pub fn mode(&self) -> ParameterMode {
        self.mode
    }

    /// Evaluate, bind, optimize and page `query`
    pub fn plan(&self, query: &QueryExpr, page: Option<PageRequest>) -> QueryResult<ProjectionExpr> {
        let folded = fold_query(query)?;
        let bound = Binder::new().bind(&folded)?;
        let (optimized, applications) = self.optimizer.optimize(bound)?;
        trace!(rewrites = applications.iter().filter(|a| a.applied).count(), "optimized query");

        match page {
            Some(request) => apply_paging(optimized, request),
            None => Ok(expose_ordering(optimized)),
        }
    }

    pub fn compile(&self, query: &QueryExpr, schema: &str, page: Option<PageRequest>) -> QueryResult<CompiledQuery> {
        let plan = self.plan(query, page)?;
        let projector = Projector::build(&plan)?;
        let command = Formatter::format(schema, self.mode, &plan.select);
        debug!(schema, sql = %command.text, params = command.params.len(), "compiled query");
        Ok(CompiledQuery { command, projector })
    }

    /// Unpaged `COUNT(*)` under the same predicate
    pub fn compile_count(&self, query: &QueryExpr, schema: &str) -> QueryResult<SqlCommand> {
        let counted = QueryExpr::Aggregate {
            source: Arc::new(query.without_ordering()),
            kind: AggregateKind::Count,
            selector: None,
        };
        Ok(self.compile(&counted, schema, None)?.command)
    }
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(ParameterMode::default())
    }
}
