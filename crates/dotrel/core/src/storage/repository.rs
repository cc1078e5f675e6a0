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

//! Per entity type CRUD.
//!
//! Every operation runs under the store's retry policy and self-heals a
//! missing table once. Translation faults surface before any I/O.

use super::statements::{self, RowValues};
use super::store::Store;
use super::CallContext;
use crate::entity::{Entity, EntityDescriptor};
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::{field, PageRequest, ProjectedValue, Query, SqlCommand};
use crate::query::projection::Projector;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// One page of results, with the unpaged total when requested
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}

pub struct Repository<E> {
    store: Arc<Store>,
    descriptor: Arc<EntityDescriptor>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            descriptor: self.descriptor.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            descriptor: E::descriptor(),
            _entity: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn query(&self) -> Query<E> {
        Query::new()
    }

    pub async fn load(&self, ctx: &CallContext, query: &Query<E>, page: Option<PageRequest>, include_total: bool) -> PersistenceResult<Page<E>> {
        let items = self
            .load_projected(ctx, query, page)
            .await?
            .into_iter()
            .map(|value| value.into_entity::<E>())
            .collect::<Result<Vec<_>, _>>()?;
        let total = if include_total { Some(self.count(ctx, query).await?) } else { None };
        Ok(Page { items, total })
    }

    /// Rows in the query's own projection shape
    pub async fn load_projected(&self, ctx: &CallContext, query: &Query<E>, page: Option<PageRequest>) -> PersistenceResult<Vec<ProjectedValue>> {
        let compiled = self.store.compiler().compile(query.expr(), ctx.schema(), page)?;
        let command = &compiled.command;
        let projector = &compiled.projector;
        self.store
            .resilient(ctx, &self.descriptor, "load", || self.fetch(ctx, command, projector))
            .await
    }

    pub async fn get(&self, ctx: &CallContext, id: i64) -> PersistenceResult<Option<E>> {
        let query = self.query().filter(field(self.descriptor.id_column().name.as_str()).eq(id));
        let page = self.load(ctx, &query, None, false).await?;
        Ok(page.items.into_iter().next())
    }

    pub async fn count(&self, ctx: &CallContext, query: &Query<E>) -> PersistenceResult<u64> {
        let command = self.store.compiler().compile_count(query.expr(), ctx.schema())?;
        self.store.resilient(ctx, &self.descriptor, "count", || self.scalar_count(ctx, &command)).await
    }

    /// Insert a new entity, assigning its identity and creation audit stamps
    pub async fn insert(&self, ctx: &CallContext, entity: &mut E) -> PersistenceResult<i64> {
        let original = entity.record().clone();
        let now = self.store.clock().now();
        let record = entity.record_mut();
        record.ensure_web_id();
        record.stamp_created(ctx.username(), now);

        let result = match RowValues::of(&*entity) {
            Ok(row) => self.store.resilient(ctx, &self.descriptor, "insert", || self.insert_once(ctx, &row)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(id) => {
                entity.record_mut().id = id;
                debug!(table = self.descriptor.table(), id, "inserted");
                Ok(id)
            }
            Err(e) => {
                *entity.record_mut() = original;
                Err(e)
            }
        }
    }

    /// Write the entity by identity, refreshing the change audit stamps
    pub async fn update(&self, ctx: &CallContext, entity: &mut E) -> PersistenceResult<()> {
        let id = entity.record().id;
        if entity.record().is_new() {
            return Err(self.not_found(id));
        }
        let original = entity.record().clone();
        let now = self.store.clock().now();
        entity.record_mut().stamp_changed(ctx.username(), now);

        let result = match RowValues::of(&*entity) {
            Ok(row) => self.store.resilient(ctx, &self.descriptor, "update", || self.update_once(ctx, &row, id)).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            *entity.record_mut() = original;
        }
        result
    }

    pub async fn delete(&self, ctx: &CallContext, entity: &E) -> PersistenceResult<()> {
        self.delete_by_id(ctx, entity.record().id).await
    }

    pub async fn delete_by_id(&self, ctx: &CallContext, id: i64) -> PersistenceResult<()> {
        self.store.resilient(ctx, &self.descriptor, "delete", || self.delete_once(ctx, id)).await
    }

    async fn fetch(&self, ctx: &CallContext, command: &SqlCommand, projector: &Projector) -> PersistenceResult<Vec<ProjectedValue>> {
        let mut conn = self.store.connect(ctx).await?;
        let rows = conn.query(command).await?;
        Ok(rows.iter().map(|row| projector.project(row)).collect::<Result<Vec<_>, _>>()?)
    }

    async fn scalar_count(&self, ctx: &CallContext, command: &SqlCommand) -> PersistenceResult<u64> {
        let mut conn = self.store.connect(ctx).await?;
        let rows = conn.query(command).await?;
        let value = rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| PersistenceError::Mapping("count returned no row".to_string()))?;
        let count = value.as_i64().map_err(|e| PersistenceError::Mapping(e.to_string()))?;
        u64::try_from(count).map_err(|_| PersistenceError::Mapping(format!("negative count {count}")))
    }

    async fn insert_once(&self, ctx: &CallContext, row: &RowValues) -> PersistenceResult<i64> {
        let mut conn = self.store.connect(ctx).await?;
        let metadata = self.store.table_metadata(conn.as_mut(), ctx, &self.descriptor).await?;
        let command = statements::insert(&metadata, row, None)?;
        let rows = conn.query(&command).await?;
        let id = rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| PersistenceError::Mapping(format!("insert into {} returned no identity", self.descriptor.table())))?
            .as_i64()
            .map_err(|e| PersistenceError::Mapping(e.to_string()))?;
        if id <= 0 {
            return Err(PersistenceError::Mapping(format!("insert into {} returned identity {id}", self.descriptor.table())));
        }
        Ok(id)
    }

    async fn update_once(&self, ctx: &CallContext, row: &RowValues, id: i64) -> PersistenceResult<()> {
        let mut conn = self.store.connect(ctx).await?;
        let metadata = self.store.table_metadata(conn.as_mut(), ctx, &self.descriptor).await?;
        let command = statements::update(&metadata, row, id)?;
        match conn.execute(&command).await? {
            0 => Err(self.not_found(id)),
            _ => Ok(()),
        }
    }

    async fn delete_once(&self, ctx: &CallContext, id: i64) -> PersistenceResult<()> {
        let mut conn = self.store.connect(ctx).await?;
        let metadata = self.store.table_metadata(conn.as_mut(), ctx, &self.descriptor).await?;
        match conn.execute(&statements::delete(&metadata, id)).await? {
            0 => Err(self.not_found(id)),
            _ => Ok(()),
        }
    }

    fn not_found(&self, id: i64) -> PersistenceError {
        PersistenceError::NotFound {
            table: self.descriptor.table().to_string(),
            id,
        }
    }
}
