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

use super::batch::BatchEngine;
use super::clock::{Clock, SystemClock};
use super::driver::{Connection, Database};
use super::heal::{FileDefinitionSource, SchemaDefinitionSource, SelfHealer};
use super::metadata::{MetadataCache, TableMetadata};
use super::repository::Repository;
use super::retry::RetryPolicy;
use super::CallContext;
use crate::entity::{Entity, EntityDescriptor, EntityRegistry, SchemaScope};
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::QueryCompiler;
use dotrel_common::StoreConfig;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared engine state: driver, caches, policies and collaborators
pub struct Store {
    database: Arc<dyn Database>,
    config: StoreConfig,
    compiler: QueryCompiler,
    metadata: MetadataCache,
    retry: RetryPolicy,
    healer: SelfHealer,
    clock: Arc<dyn Clock>,
    registry: EntityRegistry,
}

impl Store {
    pub fn new(database: Arc<dyn Database>, config: StoreConfig) -> Self {
        let source = config
            .schema_definitions_dir
            .clone()
            .map(|dir| Arc::new(FileDefinitionSource::new(dir)) as Arc<dyn SchemaDefinitionSource>);
        Self {
            database,
            compiler: QueryCompiler::new(config.parameter_mode),
            metadata: MetadataCache::from_config(&config),
            retry: RetryPolicy::from_config(&config),
            healer: SelfHealer::new(source, config.shared_schema.clone()),
            clock: Arc::new(SystemClock),
            registry: EntityRegistry::new(),
            config,
        }
    }

    pub fn with_definitions(mut self, source: Arc<dyn SchemaDefinitionSource>) -> Self {
        self.healer = SelfHealer::new(Some(source), self.config.shared_schema.clone());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_registry(mut self, registry: EntityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn repository<E: Entity>(self: &Arc<Self>) -> Repository<E> {
        Repository::new(self.clone())
    }

    pub fn batch(self: &Arc<Self>) -> BatchEngine {
        BatchEngine::new(self.clone())
    }

    /// Fresh connection for one attempt of one call
    pub async fn connect(&self, ctx: &CallContext) -> PersistenceResult<Box<dyn Connection>> {
        if ctx.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        Ok(self.database.connect(&ctx.tenant.connection).await?)
    }

    pub async fn table_metadata(&self, conn: &mut dyn Connection, ctx: &CallContext, descriptor: &EntityDescriptor) -> PersistenceResult<Arc<TableMetadata>> {
        let schema = descriptor.schema_for(ctx.schema());
        Ok(self.metadata.get(conn, schema, descriptor.table()).await?)
    }

    /// Retry transient faults; on a missing table or column, heal once and
    /// run the whole operation again.
    pub(crate) async fn resilient<T, F, Fut>(&self, ctx: &CallContext, descriptor: &EntityDescriptor, operation: &str, mut attempt: F) -> PersistenceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PersistenceResult<T>>,
    {
        match self.retry.run(ctx, operation, &mut attempt).await {
            Err(error) if error.is_schema_drift() => {
                if let Err(heal) = self.heal(ctx, descriptor).await {
                    warn!(table = descriptor.table(), error = %heal, "self-heal not possible");
                    return Err(error);
                }
                self.retry.run(ctx, operation, &mut attempt).await
            }
            other => other,
        }
    }

    async fn heal(&self, ctx: &CallContext, descriptor: &EntityDescriptor) -> PersistenceResult<()> {
        // the registered descriptor decides the table's scope
        let descriptor = self.registry.by_table(descriptor.table()).map_or(descriptor, |registered| registered.as_ref());
        let schema = descriptor.schema_for(ctx.schema());
        let table = descriptor.table();
        if matches!(descriptor.scope(), SchemaScope::Shared(_)) {
            return Err(PersistenceError::SelfHealRefused {
                schema: schema.to_string(),
                table: table.to_string(),
            });
        }
        let script = self.healer.script(schema, table)?;

        warn!(schema, table, "missing table or column, applying schema definition");
        counter!("dotrel_self_heals_total", 1);
        self.retry
            .run(ctx, "self-heal", || async {
                let mut conn = self.connect(ctx).await?;
                conn.execute(&script).await?;
                Ok(())
            })
            .await?;
        self.metadata.invalidate(schema, table);
        info!(schema, table, "schema definition applied");
        Ok(())
    }
}
