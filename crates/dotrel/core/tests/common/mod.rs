//! In-memory scripted driver shared by the integration tests.
//!
//! It answers catalog reads from registered table definitions, hands out
//! identities for inserts, tracks which ids exist per table, applies writes
//! only on commit when a transaction is open and records every command.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use dotrel_common::{ConnectionTarget, DeclaredEnum, StoreConfig, TenantContext, Value};
use dotrel_core::entity::{ColumnType, Entity, EntityDescriptor, EntityRecord, EntityRegistry};
use dotrel_core::query::SqlCommand;
use dotrel_core::storage::{CallContext, Clock, Connection, Database, DbError, Row, SchemaDefinitionSource, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SessionStatus {
    Open,
    Closed,
}

impl DeclaredEnum for SessionStatus {
    const TYPE_NAME: &'static str = "SessionStatus";

    fn member_name(&self) -> &'static str {
        match self {
            SessionStatus::Open => "Open",
            SessionStatus::Closed => "Closed",
        }
    }

    fn ordinal(&self) -> i64 {
        *self as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub record: EntityRecord,
    pub shop_id: i64,
    pub status: SessionStatus,
}

impl Session {
    pub fn open(shop_id: i64) -> Self {
        Self {
            record: EntityRecord::default(),
            shop_id,
            status: SessionStatus::Open,
        }
    }
}

impl Entity for Session {
    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(EntityDescriptor::new("Session").promote("ShopId", ColumnType::Int).promote("Status", ColumnType::Enum))
    }

    fn record(&self) -> &EntityRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut EntityRecord {
        &mut self.record
    }

    fn promoted_values(&self) -> Vec<(&'static str, Value)> {
        vec![("ShopId", Value::Int(self.shop_id)), ("Status", Value::from_enum(&self.status))]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    #[serde(flatten)]
    pub record: EntityRecord,
    pub name: String,
}

impl Shop {
    pub fn named(name: &str) -> Self {
        Self {
            record: EntityRecord::default(),
            name: name.to_string(),
        }
    }
}

impl Entity for Shop {
    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(EntityDescriptor::new("Shop").shared("shared").promote("Name", ColumnType::Text))
    }

    fn record(&self) -> &EntityRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut EntityRecord {
        &mut self.record
    }

    fn promoted_values(&self) -> Vec<(&'static str, Value)> {
        vec![("Name", Value::from(self.name.as_str()))]
    }
}

/// Never registered with the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Till {
    #[serde(flatten)]
    pub record: EntityRecord,
}

impl Entity for Till {
    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(EntityDescriptor::new("Till"))
    }

    fn record(&self) -> &EntityRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut EntityRecord {
        &mut self.record
    }
}

/// Catalog rows of a standard entity table plus promoted columns
pub fn catalog(descriptor: &EntityDescriptor) -> Vec<Row> {
    descriptor
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| vec![Value::from(c.name.as_str()), Value::from("nvarchar"), Value::Bool(i == 0), Value::Bool(false), Value::Bool(c.nullable)])
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Begin,
    Commit,
    Rollback,
}

struct Fault {
    prefix: String,
    error: DbError,
    remaining: usize,
}

enum Write {
    Insert(String, i64),
    Delete(String, i64),
}

#[derive(Default)]
struct State {
    catalogs: HashMap<String, Vec<Row>>,
    definitions: HashMap<String, Vec<Row>>,
    ids: HashMap<String, HashSet<i64>>,
    next_id: i64,
    select_results: VecDeque<Vec<Row>>,
    faults: Vec<Fault>,
    commands: Vec<SqlCommand>,
    events: Vec<Event>,
    pending: Option<Vec<Write>>,
}

impl State {
    fn exists(&self, table: &str, id: i64) -> bool {
        let mut present = self.ids.get(table).is_some_and(|ids| ids.contains(&id));
        for write in self.pending.iter().flatten() {
            match write {
                Write::Insert(t, i) if t == table && *i == id => present = true,
                Write::Delete(t, i) if t == table && *i == id => present = false,
                _ => {}
            }
        }
        present
    }

    fn write(&mut self, write: Write) {
        match &mut self.pending {
            Some(pending) => pending.push(write),
            None => self.apply(write),
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::Insert(table, id) => {
                self.ids.entry(table).or_default().insert(id);
            }
            Write::Delete(table, id) => {
                if let Some(ids) = self.ids.get_mut(&table) {
                    ids.remove(&id);
                }
            }
        }
    }

    fn fault(&mut self, text: &str) -> Option<DbError> {
        let fault = self.faults.iter_mut().find(|f| f.remaining > 0 && text.starts_with(&f.prefix))?;
        fault.remaining -= 1;
        Some(fault.error.clone())
    }
}

/// `[schema].[table]` named by a command
fn target(text: &str) -> Option<String> {
    let split = text.find("].[")?;
    let start = text[..split].rfind('[')?;
    let end = split + 3 + text[split + 3..].find(']')?;
    Some(text[start..=end].to_string())
}

#[derive(Clone, Default)]
pub struct ScriptedDatabase {
    state: Arc<Mutex<State>>,
}

impl ScriptedDatabase {
    pub fn new() -> Self {
        let db = Self::default();
        db.state.lock().next_id = 100;
        db
    }

    /// Make `descriptor`'s table exist in `schema`
    pub fn with_table(self, schema: &str, descriptor: &EntityDescriptor) -> Self {
        self.state.lock().catalogs.insert(format!("[{schema}].[{}]", descriptor.table()), catalog(descriptor));
        self
    }

    /// Columns created when a `CREATE TABLE` for `descriptor` runs
    pub fn with_definition(self, descriptor: &EntityDescriptor) -> Self {
        self.state.lock().definitions.insert(descriptor.table().to_string(), catalog(descriptor));
        self
    }

    pub fn seed_row(&self, schema: &str, table: &str, id: i64) {
        self.state.lock().ids.entry(format!("[{schema}].[{table}]")).or_default().insert(id);
    }

    /// Rows returned by the next non-catalog `SELECT`
    pub fn push_select(&self, rows: Vec<Row>) {
        self.state.lock().select_results.push_back(rows);
    }

    /// Fail the next `times` commands starting with `prefix`
    pub fn fail(&self, prefix: &str, error: DbError, times: usize) {
        self.state.lock().faults.push(Fault {
            prefix: prefix.to_string(),
            error,
            remaining: times,
        });
    }

    pub fn commands(&self) -> Vec<SqlCommand> {
        self.state.lock().commands.clone()
    }

    pub fn commands_starting(&self, prefix: &str) -> Vec<SqlCommand> {
        self.commands().into_iter().filter(|c| c.text.starts_with(prefix)).collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn connects(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Connect).count()
    }

    pub fn row_count(&self, schema: &str, table: &str) -> usize {
        self.state.lock().ids.get(&format!("[{schema}].[{table}]")).map_or(0, HashSet::len)
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn connect(&self, _target: &ConnectionTarget) -> Result<Box<dyn Connection>, DbError> {
        self.state.lock().events.push(Event::Connect);
        Ok(Box::new(ScriptedConnection { state: self.state.clone() }))
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&mut self, command: &SqlCommand) -> Result<Vec<Row>, DbError> {
        let mut state = self.state.lock();
        state.commands.push(command.clone());
        if let Some(error) = state.fault(&command.text) {
            return Err(error);
        }

        if command.text.starts_with("SELECT c.[name]") {
            let name = command.params.first().and_then(|p| p.as_str().ok()).unwrap_or_default().to_string();
            return Ok(state.catalogs.get(&name).cloned().unwrap_or_default());
        }
        if command.text.starts_with("INSERT") {
            let table = target(&command.text).unwrap_or_default();
            if !state.catalogs.contains_key(&table) {
                return Err(DbError::with_code(208, format!("Invalid object name '{table}'")));
            }
            state.next_id += 1;
            let id = state.next_id;
            state.write(Write::Insert(table, id));
            return Ok(match command.params.last() {
                Some(Value::Guid(web_id)) if command.text.contains("AS [WebId]") => vec![vec![Value::Guid(*web_id), Value::Int(id)]],
                _ => vec![vec![Value::Int(id)]],
            });
        }
        if command.text.contains(" COUNT(*) ") {
            let count = state.select_results.pop_front().unwrap_or_else(|| vec![vec![Value::Int(0)]]);
            return Ok(count);
        }
        Ok(state.select_results.pop_front().unwrap_or_default())
    }

    async fn execute(&mut self, command: &SqlCommand) -> Result<u64, DbError> {
        let mut state = self.state.lock();
        state.commands.push(command.clone());
        if let Some(error) = state.fault(&command.text) {
            return Err(error);
        }

        let table = target(&command.text).unwrap_or_default();
        if command.text.starts_with("CREATE TABLE") {
            let bare = table.rsplit("].[").next().unwrap_or_default().trim_end_matches(']').to_string();
            if let Some(columns) = state.definitions.get(&bare).cloned() {
                state.catalogs.insert(table, columns);
            }
            return Ok(0);
        }

        let id = command.params.last().and_then(|p| p.as_i64().ok()).unwrap_or_default();
        if !state.exists(&table, id) {
            return Ok(0);
        }
        if command.text.starts_with("DELETE") {
            state.write(Write::Delete(table, id));
        }
        Ok(1)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        let mut state = self.state.lock();
        state.events.push(Event::Begin);
        state.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let mut state = self.state.lock();
        state.events.push(Event::Commit);
        for write in state.pending.take().unwrap_or_default() {
            state.apply(write);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        let mut state = self.state.lock();
        state.events.push(Event::Rollback);
        state.pending = None;
        Ok(())
    }
}

pub struct FixedClock(pub DateTime<FixedOffset>);

impl FixedClock {
    pub fn at(year: i32, month: u32, day: u32) -> Self {
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        Self(offset.with_ymd_and_hms(year, month, day, 9, 30, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// Definitions producing a `CREATE TABLE` for any table
pub struct CreateTable;

impl SchemaDefinitionSource for CreateTable {
    fn definition(&self, table: &str) -> Option<String> {
        Some(format!("CREATE TABLE [{{schema}}].[{table}] ([{table}Id] INT IDENTITY(1,1) PRIMARY KEY, [Document] NVARCHAR(MAX))"))
    }
}

pub fn registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry.register::<Session>().register::<Shop>();
    registry
}

pub fn store(db: &ScriptedDatabase) -> Arc<Store> {
    let config = StoreConfig::without_delays();
    Arc::new(Store::new(Arc::new(db.clone()), config).with_clock(Arc::new(FixedClock::at(2025, 3, 14))).with_registry(registry()))
}

pub fn ctx() -> CallContext {
    CallContext::new(TenantContext::new("tenant", ConnectionTarget::new("test", "memory"), "ann"))
}
