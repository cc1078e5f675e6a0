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

//! Cross entity type unit of work.
//!
//! All deletes, inserts and updates of one call commit in a single
//! transaction or not at all. Inserts report their generated identity next
//! to the caller's correlation key so new instances can be updated in place.

use super::driver::Connection;
use super::statements::{self, BatchScript, RowValues, StatementKind};
use super::store::Store;
use super::CallContext;
use crate::entity::{EntityDescriptor, EntityRecord, PersistentEntity};
use crate::error::{PersistenceError, PersistenceResult};
use dotrel_common::Value;
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch of {count} items exceeds the limit of {limit}")]
    TooLarge { count: usize, limit: usize },
    #[error("Entity type {0} is not registered")]
    Unregistered(String),
    #[error("Batch persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Outcome of a batch. Failures are reported here, never raised.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Correlation key to generated identity, for every inserted entity
    pub id_map: HashMap<Uuid, i64>,
    pub errors: Vec<BatchError>,
}

impl BatchResult {
    pub fn failure(error: impl Into<BatchError>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Entities to write and delete together
#[derive(Default)]
pub struct UnitOfWork<'a> {
    upserts: Vec<&'a mut dyn PersistentEntity>,
    deletes: Vec<&'a dyn PersistentEntity>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert when new, update otherwise
    pub fn upsert(&mut self, entity: &'a mut dyn PersistentEntity) -> &mut Self {
        self.upserts.push(entity);
        self
    }

    pub fn delete(&mut self, entity: &'a dyn PersistentEntity) -> &mut Self {
        self.deletes.push(entity);
        self
    }

    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Planned {
    Delete { descriptor: Arc<EntityDescriptor>, id: i64 },
    Insert { descriptor: Arc<EntityDescriptor>, row: RowValues, web_id: Uuid },
    Update { descriptor: Arc<EntityDescriptor>, row: RowValues, id: i64 },
}

impl Planned {
    fn descriptor(&self) -> &EntityDescriptor {
        match self {
            Planned::Delete { descriptor, .. } | Planned::Insert { descriptor, .. } | Planned::Update { descriptor, .. } => descriptor,
        }
    }
}

#[derive(Debug, Default)]
struct Outcome {
    /// (correlation key, identity) in insert order
    inserted: Vec<(Uuid, i64)>,
    updated: usize,
    deleted: usize,
}

pub struct BatchEngine {
    store: Arc<Store>,
}

impl BatchEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist `work` atomically. Every upserted entity receives its
    /// identity and audit stamps on success and is left untouched on failure.
    pub async fn persist(&self, ctx: &CallContext, mut work: UnitOfWork<'_>) -> BatchResult {
        let limit = self.store.config().batch_max_items;
        let count = work.len();
        if count > limit {
            return BatchResult::failure(BatchError::TooLarge { count, limit });
        }
        if count == 0 {
            return BatchResult::default();
        }
        if let Some(name) = self.unregistered(&work) {
            return BatchResult::failure(BatchError::Unregistered(name));
        }

        let originals: Vec<EntityRecord> = work.upserts.iter().map(|e| e.entity_record().clone()).collect();
        let plan = match self.plan(ctx, &mut work) {
            Ok(plan) => plan,
            Err(e) => {
                restore(&mut work, originals);
                return BatchResult::failure(e);
            }
        };

        let result = self.store.retry_policy().run(ctx, "batch", || self.run_script(ctx, &plan)).await;
        match result {
            Ok(outcome) => {
                let ids = outcome.inserted.iter().copied().collect::<HashMap<Uuid, i64>>();
                for entity in work.upserts.iter_mut() {
                    let record = entity.entity_record_mut();
                    if record.is_new()
                        && let Some(web_id) = record.web_id
                        && let Some(id) = ids.get(&web_id)
                    {
                        record.id = *id;
                    }
                }
                counter!("dotrel_batch_commits_total", 1);
                info!(inserted = outcome.inserted.len(), updated = outcome.updated, deleted = outcome.deleted, "batch committed");
                BatchResult {
                    inserted: outcome.inserted.len(),
                    updated: outcome.updated,
                    deleted: outcome.deleted,
                    id_map: ids,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                restore(&mut work, originals);
                error!(error = %e, "batch failed");
                BatchResult::failure(e)
            }
        }
    }

    fn unregistered(&self, work: &UnitOfWork<'_>) -> Option<String> {
        let registry = self.store.registry();
        work.upserts
            .iter()
            .map(|e| e.entity_descriptor())
            .chain(work.deletes.iter().map(|e| e.entity_descriptor()))
            .find(|d| !registry.contains(d))
            .map(|d| d.name().to_string())
    }

    /// Stamp the upserts and capture the rows to write
    fn plan(&self, ctx: &CallContext, work: &mut UnitOfWork<'_>) -> PersistenceResult<Vec<Planned>> {
        let now = self.store.clock().now();
        let mut plan = Vec::with_capacity(work.len());

        for entity in &work.deletes {
            let descriptor = entity.entity_descriptor();
            let id = entity.entity_record().id;
            if id == 0 {
                return Err(PersistenceError::NotFound {
                    table: descriptor.table().to_string(),
                    id,
                });
            }
            plan.push(Planned::Delete { descriptor, id });
        }

        let mut web_ids = HashSet::new();
        for entity in work.upserts.iter_mut() {
            let descriptor = entity.entity_descriptor();
            let record = entity.entity_record_mut();
            let web_id = record.ensure_web_id();
            let id = record.id;
            if record.is_new() {
                // inserted ids are matched back to entities by WebId
                if !web_ids.insert(web_id) {
                    return Err(PersistenceError::Mapping(format!("duplicate WebId {web_id} in batch")));
                }
                record.stamp_created(ctx.username(), now);
                let row = RowValues::of(&**entity)?;
                plan.push(Planned::Insert { descriptor, row, web_id });
            } else {
                record.stamp_changed(ctx.username(), now);
                let row = RowValues::of(&**entity)?;
                plan.push(Planned::Update { descriptor, row, id });
            }
        }
        Ok(plan)
    }

    async fn script(&self, conn: &mut dyn Connection, ctx: &CallContext, plan: &[Planned]) -> PersistenceResult<BatchScript> {
        let mut script = BatchScript::new();
        for item in plan {
            let metadata = self.store.table_metadata(conn, ctx, item.descriptor()).await?;
            match item {
                Planned::Delete { id, .. } => script.push(StatementKind::Delete, metadata.table(), statements::delete(&metadata, *id)),
                Planned::Insert { row, web_id, .. } => script.push(StatementKind::Insert, metadata.table(), statements::insert(&metadata, row, Some(*web_id))?),
                Planned::Update { row, id, .. } => script.push(StatementKind::Update, metadata.table(), statements::update(&metadata, row, *id)?),
            }
        }
        Ok(script)
    }

    /// One attempt: fresh connection, one transaction, rolled back on any fault
    async fn run_script(&self, ctx: &CallContext, plan: &[Planned]) -> PersistenceResult<Outcome> {
        let mut conn = self.store.connect(ctx).await?;
        let script = self.script(conn.as_mut(), ctx, plan).await?;
        debug!(statements = script.len(), script = %script.render(), "running batch");

        conn.begin().await?;
        let outcome = match execute(conn.as_mut(), &script).await {
            Ok(outcome) => outcome,
            Err(e) => {
                rollback(conn.as_mut()).await;
                return Err(e);
            }
        };
        if let Err(e) = conn.commit().await {
            rollback(conn.as_mut()).await;
            return Err(e.into());
        }
        Ok(outcome)
    }
}

async fn execute(conn: &mut dyn Connection, script: &BatchScript) -> PersistenceResult<Outcome> {
    let mut outcome = Outcome::default();
    for statement in script.statements() {
        match statement.kind {
            StatementKind::Insert => {
                let rows = conn.query(&statement.command).await?;
                let row = rows.first().ok_or_else(|| PersistenceError::Mapping("insert returned no row".to_string()))?;
                outcome.inserted.push(correlated(row)?);
            }
            StatementKind::Update | StatementKind::Delete => {
                if conn.execute(&statement.command).await? == 0 {
                    let id = statement.command.params.last().and_then(|v| v.as_i64().ok()).unwrap_or_default();
                    return Err(PersistenceError::NotFound {
                        table: statement.table.clone(),
                        id,
                    });
                }
                if statement.kind == StatementKind::Update {
                    outcome.updated += 1;
                } else {
                    outcome.deleted += 1;
                }
            }
        }
    }
    Ok(outcome)
}

fn correlated(row: &[Value]) -> PersistenceResult<(Uuid, i64)> {
    match row {
        [Value::Guid(web_id), id] => {
            let id = id.as_i64().map_err(|e| PersistenceError::Mapping(e.to_string()))?;
            if id <= 0 {
                return Err(PersistenceError::Mapping(format!("insert of {web_id} returned identity {id}")));
            }
            Ok((*web_id, id))
        }
        other => Err(PersistenceError::Mapping(format!("unexpected insert output {other:?}"))),
    }
}

async fn rollback(conn: &mut dyn Connection) {
    counter!("dotrel_batch_rollbacks_total", 1);
    if let Err(e) = conn.rollback().await {
        error!(error = %e, "rollback failed");
    }
}

fn restore(work: &mut UnitOfWork<'_>, originals: Vec<EntityRecord>) {
    for (entity, original) in work.upserts.iter_mut().zip(originals) {
        *entity.entity_record_mut() = original;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_output_needs_a_positive_identity() {
        let web_id = Uuid::new_v4();
        assert_eq!(correlated(&[Value::Guid(web_id), Value::Int(7)]).unwrap(), (web_id, 7));
        assert!(matches!(correlated(&[Value::Guid(web_id), Value::Int(0)]), Err(PersistenceError::Mapping(_))));
        assert!(matches!(correlated(&[Value::Guid(web_id), Value::Int(-3)]), Err(PersistenceError::Mapping(_))));
        assert!(matches!(correlated(&[Value::Int(7)]), Err(PersistenceError::Mapping(_))));
    }
}
