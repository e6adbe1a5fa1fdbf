//! In-memory storage engine
//!
//! A BTreeMap-based engine for testing and for hosts without a browser
//! object store. Not persistent: everything lives as long as the engine value
//! (and its clones, which share state).
//!
//! Writes are applied in request order. The first write of a transaction takes
//! a backup of the collection, so a failed request or an abort restores the
//! collection as it was when the transaction started.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::rc::Rc;

use serde_json::Value;

use crate::engine::{
    CursorRow, Engine, EngineCursor, EngineError, EngineTransaction, Handle, SchemaEditor,
    TxMode, TxOutcome, UpgradeFn, VersionChange,
};
use crate::key::{evaluate_key_path, inject_key, Key, KeyRange};
use crate::schema::{IndexConfig, KeyPolicy};

type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone)]
struct IndexData {
    config: IndexConfig,
    /// index key -> primary keys
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    fn new(config: IndexConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
        }
    }

    /// Keys a record contributes to this index. Missing or invalid values
    /// contribute nothing.
    fn keys_for(&self, value: &Value) -> Vec<Key> {
        let Some(indexed) = evaluate_key_path(value, &self.config.key_path) else {
            return Vec::new();
        };
        match indexed {
            Value::Array(items) if self.config.multi_entry => {
                let unique: BTreeSet<Key> =
                    items.iter().filter_map(|v| Key::try_from(v).ok()).collect();
                unique.into_iter().collect()
            }
            other => Key::try_from(other).ok().into_iter().collect(),
        }
    }

    fn insert(&mut self, primary: &Key, value: &Value) {
        for key in self.keys_for(value) {
            self.entries.entry(key).or_default().insert(primary.clone());
        }
    }

    fn remove(&mut self, primary: &Key, value: &Value) {
        for key in self.keys_for(value) {
            if let Some(primaries) = self.entries.get_mut(&key) {
                primaries.remove(primary);
                if primaries.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Fails if `value` would give a unique index key already held by another record.
    fn check_unique(&self, primary: &Key, value: &Value) -> EngineResult<()> {
        if !self.config.unique {
            return Ok(());
        }
        for key in self.keys_for(value) {
            if let Some(holders) = self.entries.get(&key) {
                if holders.iter().any(|p| p != primary) {
                    return Err(EngineError::constraint(format!(
                        "unique index '{}' already contains key {}",
                        self.config.name, key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CollectionData {
    policy: KeyPolicy,
    records: BTreeMap<Key, Value>,
    indices: BTreeMap<String, IndexData>,
    next_key: f64,
}

impl CollectionData {
    fn new(policy: KeyPolicy) -> Self {
        Self {
            policy,
            records: BTreeMap::new(),
            indices: BTreeMap::new(),
            next_key: 1.0,
        }
    }

    fn index(&self, name: &str) -> EngineResult<&IndexData> {
        self.indices
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("index '{}' not found", name)))
    }

    fn generate_key(&mut self) -> Key {
        let key = Key::Number(self.next_key);
        self.next_key += 1.0;
        key
    }

    /// Explicit numeric keys push the generator past them.
    fn observe_key(&mut self, key: &Key) {
        if !self.policy.auto_generate {
            return;
        }
        if let Key::Number(n) = key {
            if *n >= self.next_key {
                self.next_key = n.floor() + 1.0;
            }
        }
    }

    /// Work out the primary key for a write, injecting a generated key into
    /// the record when the collection has an inline key path.
    fn resolve_key(&mut self, value: &mut Value, explicit: Option<&Key>) -> EngineResult<Key> {
        match (self.policy.key_path.clone(), explicit) {
            (Some(_), Some(_)) => Err(EngineError::data(
                "explicit key supplied to a collection with an inline key path",
            )),
            (Some(path), None) => match evaluate_key_path(value, &path) {
                Some(found) => {
                    let key = Key::try_from(found)?;
                    self.observe_key(&key);
                    Ok(key)
                }
                None if self.policy.auto_generate => {
                    let key = self.generate_key();
                    inject_key(value, &path, &key)?;
                    Ok(key)
                }
                None => Err(EngineError::data(format!(
                    "record has no key at path '{}'",
                    path
                ))),
            },
            (None, Some(key)) => {
                self.observe_key(key);
                Ok(key.clone())
            }
            (None, None) if self.policy.auto_generate => Ok(self.generate_key()),
            (None, None) => Err(EngineError::data(
                "collection uses explicit keys and no key was supplied",
            )),
        }
    }

    fn store(&mut self, mut value: Value, explicit: Option<&Key>, overwrite: bool) -> EngineResult<Key> {
        let key = self.resolve_key(&mut value, explicit)?;
        let previous = self.records.get(&key);
        if previous.is_some() && !overwrite {
            return Err(EngineError::constraint(format!(
                "key {} already exists",
                key
            )));
        }
        for index in self.indices.values() {
            index.check_unique(&key, &value)?;
        }

        if let Some(previous) = self.records.remove(&key) {
            for index in self.indices.values_mut() {
                index.remove(&key, &previous);
            }
        }
        for index in self.indices.values_mut() {
            index.insert(&key, &value);
        }
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn remove(&mut self, key: &Key) {
        if let Some(previous) = self.records.remove(key) {
            for index in self.indices.values_mut() {
                index.remove(key, &previous);
            }
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        for index in self.indices.values_mut() {
            index.entries.clear();
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    version: u32,
    generation: u64,
    collections: BTreeMap<String, CollectionData>,
}

#[derive(Debug, Default)]
struct EngineState {
    databases: HashMap<String, Database>,
    next_generation: u64,
}

impl EngineState {
    fn live_database(&self, name: &str, generation: u64) -> EngineResult<&Database> {
        self.databases
            .get(name)
            .filter(|db| db.generation == generation)
            .ok_or_else(|| EngineError::invalid_state(format!("connection to '{}' is closed", name)))
    }

    fn live_database_mut(&mut self, name: &str, generation: u64) -> EngineResult<&mut Database> {
        self.databases
            .get_mut(name)
            .filter(|db| db.generation == generation)
            .ok_or_else(|| EngineError::invalid_state(format!("connection to '{}' is closed", name)))
    }
}

/// In-memory object-store engine.
///
/// Clones share the same databases, the way two tabs share one browser profile.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Rc<RefCell<EngineState>>,
    available: bool,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(EngineState::default())),
            available: true,
        }
    }

    /// An engine that reports itself missing, like a host with no object store.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Stored version of a database, if it exists.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.state.borrow().databases.get(name).map(|db| db.version)
    }

    /// Names of all databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().databases.keys().cloned().collect();
        names.sort();
        names
    }
}

struct MemoryEditor<'a> {
    db: &'a mut Database,
}

impl SchemaEditor for MemoryEditor<'_> {
    fn collection_names(&self) -> Vec<String> {
        self.db.collections.keys().cloned().collect()
    }

    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>> {
        self.db
            .collections
            .get(collection)
            .map(|c| c.indices.keys().cloned().collect())
            .ok_or_else(|| EngineError::not_found(format!("collection '{}' not found", collection)))
    }

    fn create_collection(&mut self, name: &str, policy: &KeyPolicy) -> EngineResult<()> {
        if self.db.collections.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "collection '{}' already exists",
                name
            )));
        }
        self.db
            .collections
            .insert(name.to_string(), CollectionData::new(policy.clone()));
        Ok(())
    }

    fn create_index(&mut self, collection: &str, index: &IndexConfig) -> EngineResult<()> {
        let data = self.db.collections.get_mut(collection).ok_or_else(|| {
            EngineError::not_found(format!("collection '{}' not found", collection))
        })?;
        if data.indices.contains_key(&index.name) {
            return Err(EngineError::constraint(format!(
                "index '{}' already exists on '{}'",
                index.name, collection
            )));
        }

        let mut built = IndexData::new(index.clone());
        for (primary, value) in &data.records {
            built.check_unique(primary, value)?;
            built.insert(primary, value);
        }
        data.indices.insert(index.name.clone(), built);
        Ok(())
    }
}

impl Engine for MemoryEngine {
    type Handle = MemoryHandle;

    fn is_available(&self) -> bool {
        self.available
    }

    async fn open(&self, name: &str, version: u32, upgrade: UpgradeFn) -> EngineResult<MemoryHandle> {
        if !self.available {
            return Err(EngineError::unknown("no storage engine in this environment"));
        }
        if version == 0 {
            return Err(EngineError::new("TypeError", "version must be a positive integer"));
        }

        let mut state = self.state.borrow_mut();
        let current = state.databases.get(name).map(|db| db.version).unwrap_or(0);
        if version < current {
            return Err(EngineError::version(format!(
                "requested version ({}) is less than the existing version ({})",
                version, current
            )));
        }

        if version > current {
            let mut staged = state.databases.get(name).cloned().unwrap_or_default();
            upgrade(
                &mut MemoryEditor { db: &mut staged },
                VersionChange {
                    old: current,
                    new: version,
                },
            )?;
            state.next_generation += 1;
            staged.version = version;
            staged.generation = state.next_generation;
            state.databases.insert(name.to_string(), staged);
        }

        let generation = state.databases.get(name).map(|db| db.generation).unwrap_or_default();
        Ok(MemoryHandle {
            state: self.state.clone(),
            name: name.to_string(),
            version,
            generation,
            closed: Rc::new(Cell::new(false)),
        })
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        if !self.available {
            return Err(EngineError::unknown("no storage engine in this environment"));
        }
        self.state.borrow_mut().databases.remove(name);
        Ok(())
    }
}

/// Connection to a database in a [`MemoryEngine`].
///
/// An upgrade or delete by another opener closes it, the way a version change
/// closes older connections in the browser.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Rc<RefCell<EngineState>>,
    name: String,
    version: u32,
    generation: u64,
    closed: Rc<Cell<bool>>,
}

impl Handle for MemoryHandle {
    type Transaction = MemoryTransaction;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.state
            .borrow()
            .live_database(&self.name, self.generation)
            .map(|db| db.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn index_names(&self, collection: &str) -> EngineResult<Vec<String>> {
        let state = self.state.borrow();
        let db = state.live_database(&self.name, self.generation)?;
        db.collections
            .get(collection)
            .map(|c| c.indices.keys().cloned().collect())
            .ok_or_else(|| EngineError::not_found(format!("collection '{}' not found", collection)))
    }

    fn transaction(&self, collection: &str, mode: TxMode) -> EngineResult<MemoryTransaction> {
        if self.is_closed() {
            return Err(EngineError::invalid_state(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        if !self.has_collection(collection) {
            return Err(EngineError::not_found(format!(
                "collection '{}' not found",
                collection
            )));
        }
        Ok(MemoryTransaction {
            inner: Rc::new(TxInner {
                state: self.state.clone(),
                database: self.name.clone(),
                generation: self.generation,
                collection: collection.to_string(),
                mode,
                backup: RefCell::new(None),
                status: RefCell::new(TxStatus::Active),
            }),
        })
    }

    fn close(&self) {
        self.closed.set(true);
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
            || self
                .state
                .borrow()
                .live_database(&self.name, self.generation)
                .is_err()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TxStatus {
    Active,
    Committing,
    Failed(EngineError),
    Aborted,
}

#[derive(Debug)]
struct TxInner {
    state: Rc<RefCell<EngineState>>,
    database: String,
    generation: u64,
    collection: String,
    mode: TxMode,
    backup: RefCell<Option<CollectionData>>,
    status: RefCell<TxStatus>,
}

impl TxInner {
    fn ensure_active(&self) -> EngineResult<()> {
        match &*self.status.borrow() {
            TxStatus::Active => Ok(()),
            _ => Err(EngineError::inactive(format!(
                "transaction on '{}' is no longer active",
                self.collection
            ))),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&CollectionData) -> EngineResult<R>) -> EngineResult<R> {
        let result = self.ensure_active().and_then(|_| {
            let state = self.state.borrow();
            let db = state.live_database(&self.database, self.generation)?;
            let data = db.collections.get(&self.collection).ok_or_else(|| {
                EngineError::not_found(format!("collection '{}' not found", self.collection))
            })?;
            f(data)
        });
        self.settle(result)
    }

    fn write<R>(&self, f: impl FnOnce(&mut CollectionData) -> EngineResult<R>) -> EngineResult<R> {
        let result = self.ensure_active().and_then(|_| {
            if self.mode == TxMode::ReadOnly {
                return Err(EngineError::read_only(format!(
                    "write to '{}' inside a readonly transaction",
                    self.collection
                )));
            }
            let mut state = self.state.borrow_mut();
            let db = state.live_database_mut(&self.database, self.generation)?;
            let data = db.collections.get_mut(&self.collection).ok_or_else(|| {
                EngineError::not_found(format!("collection '{}' not found", self.collection))
            })?;
            let mut backup = self.backup.borrow_mut();
            if backup.is_none() {
                *backup = Some(data.clone());
            }
            f(data)
        });
        self.settle(result)
    }

    /// A failed request fails the whole transaction.
    fn settle<R>(&self, result: EngineResult<R>) -> EngineResult<R> {
        if let Err(err) = &result {
            if *self.status.borrow() == TxStatus::Active {
                self.rollback();
                *self.status.borrow_mut() = TxStatus::Failed(err.clone());
            }
        }
        result
    }

    fn rollback(&self) {
        let Some(backup) = self.backup.borrow_mut().take() else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if let Ok(db) = state.live_database_mut(&self.database, self.generation) {
            db.collections.insert(self.collection.clone(), backup);
        }
    }
}

/// Transaction over one collection of a [`MemoryEngine`] database.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Rc<TxInner>,
}

impl EngineTransaction for MemoryTransaction {
    type Cursor = MemoryCursor;

    fn mode(&self) -> TxMode {
        self.inner.mode
    }

    async fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        self.inner.read(|data| Ok(data.records.get(key).cloned()))
    }

    async fn index_get(&self, index: &str, key: &Key) -> EngineResult<Option<Value>> {
        self.inner.read(|data| {
            let first = data
                .index(index)?
                .entries
                .get(key)
                .and_then(|primaries| primaries.iter().next());
            Ok(first.and_then(|p| data.records.get(p)).cloned())
        })
    }

    async fn index_get_all(&self, index: &str, key: &Key) -> EngineResult<Vec<Value>> {
        self.inner.read(|data| {
            let matches = data
                .index(index)?
                .entries
                .get(key)
                .map(|primaries| {
                    primaries
                        .iter()
                        .filter_map(|p| data.records.get(p).cloned())
                        .collect()
                })
                .unwrap_or_default();
            Ok(matches)
        })
    }

    async fn get_all(&self) -> EngineResult<Vec<Value>> {
        self.inner.read(|data| Ok(data.records.values().cloned().collect()))
    }

    async fn count(&self) -> EngineResult<u64> {
        self.inner.read(|data| Ok(data.records.len() as u64))
    }

    async fn add(&self, value: &Value, key: Option<&Key>) -> EngineResult<Key> {
        self.inner.write(|data| data.store(value.clone(), key, false))
    }

    async fn put(&self, value: &Value, key: Option<&Key>) -> EngineResult<Key> {
        self.inner.write(|data| data.store(value.clone(), key, true))
    }

    async fn delete(&self, key: &Key) -> EngineResult<()> {
        self.inner.write(|data| {
            data.remove(key);
            Ok(())
        })
    }

    async fn clear(&self) -> EngineResult<()> {
        self.inner.write(|data| {
            data.clear();
            Ok(())
        })
    }

    async fn open_cursor(&self, range: Option<&KeyRange>) -> EngineResult<MemoryCursor> {
        self.inner.ensure_active()?;
        Ok(MemoryCursor {
            tx: self.inner.clone(),
            range: range.cloned(),
            last: None,
        })
    }

    fn commit(&self) -> EngineResult<()> {
        self.inner.ensure_active()?;
        *self.inner.status.borrow_mut() = TxStatus::Committing;
        Ok(())
    }

    fn abort(&self) -> EngineResult<()> {
        match &*self.inner.status.borrow() {
            TxStatus::Active | TxStatus::Committing => {}
            _ => {
                return Err(EngineError::invalid_state(
                    "transaction already finished or aborted",
                ))
            }
        }
        self.inner.rollback();
        *self.inner.status.borrow_mut() = TxStatus::Aborted;
        Ok(())
    }

    async fn finish(self) -> TxOutcome {
        let status = self.inner.status.borrow().clone();
        match status {
            TxStatus::Active | TxStatus::Committing => {
                self.inner.backup.borrow_mut().take();
                *self.inner.status.borrow_mut() = TxStatus::Committing;
                TxOutcome::Completed
            }
            TxStatus::Failed(err) => TxOutcome::Failed(err),
            TxStatus::Aborted => TxOutcome::Aborted,
        }
    }
}

/// Cursor over a [`MemoryTransaction`]'s collection, ascending by primary key.
#[derive(Debug)]
pub struct MemoryCursor {
    tx: Rc<TxInner>,
    range: Option<KeyRange>,
    last: Option<Key>,
}

impl EngineCursor for MemoryCursor {
    async fn next(&mut self) -> EngineResult<Option<CursorRow>> {
        let last = self.last.clone();
        let range = self.range.clone();
        let row = self.tx.read(|data| {
            let lower = match (&last, range.as_ref()) {
                (Some(last), _) => Bound::Excluded(last),
                (None, Some(range)) => range.lower(),
                (None, None) => Bound::Unbounded,
            };
            let upper = range.as_ref().map(|r| r.upper()).unwrap_or(Bound::Unbounded);
            if let (Bound::Excluded(l), Bound::Excluded(u)) = (lower, upper) {
                if l >= u {
                    return Ok(None);
                }
            }
            if let (Bound::Excluded(l) | Bound::Included(l), Bound::Excluded(u) | Bound::Included(u)) =
                (lower, upper)
            {
                if l > u {
                    return Ok(None);
                }
            }
            Ok(data
                .records
                .range::<Key, _>((lower, upper))
                .next()
                .map(|(key, value)| CursorRow {
                    key: key.clone(),
                    value: value.clone(),
                }))
        })?;
        if let Some(row) = &row {
            self.last = Some(row.key.clone());
        }
        Ok(row)
    }
}
