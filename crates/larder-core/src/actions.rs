//! Typed asynchronous operations over one collection
//!
//! An [`ActionSet`] binds a collection name (and optionally a config) to the
//! shared [`ConnectionManager`]. Every operation:
//!
//! 1. gets a connection from the manager,
//! 2. checks the collection exists (short-circuiting if not),
//! 3. opens a transaction in the narrowest mode (`ReadOnly` for reads),
//! 4. issues one engine request,
//! 5. settles from that request and the transaction's outcome.
//!
//! Mutations also ask the engine to commit right after their request succeeds.
//! There are no retries; every failure is returned to the caller.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use larder_core::{ActionSetFactory, ConnectionManager, MemoryConfigStore, MemoryEngine};
//! use larder_core::schema::{CollectionConfig, DatabaseConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Item { id: String, title: String }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let config = DatabaseConfig::new("app-db", 1)
//!     .store(CollectionConfig::new("items").key_path("id"));
//! let manager = Rc::new(ConnectionManager::new(MemoryEngine::new(), MemoryConfigStore::new()));
//! let items = ActionSetFactory::new(manager, Some(config)).for_collection::<Item>("items", None);
//!
//! let item = Item { id: "a1".into(), title: "X".into() };
//! items.add(&item, None).await.unwrap();
//! assert_eq!(items.get_by_id("a1").await.unwrap(), Some(item));
//! # });
//! ```

use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::engine::{Engine, EngineCursor, EngineTransaction, Handle, TxMode};
use crate::error::Result;
use crate::key::{Key, KeyRange};
use crate::logging::prefix;
use crate::schema::DatabaseConfig;
use crate::transaction::Transaction;

type EngineTx<E> = <<E as Engine>::Handle as Handle>::Transaction;

/// A decoded row visited by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<T> {
    pub key: Key,
    pub value: T,
}

/// Produces [`ActionSet`]s bound to collection names.
pub struct ActionSetFactory<E: Engine> {
    manager: Rc<ConnectionManager<E>>,
    config: Option<DatabaseConfig>,
}

impl<E: Engine> Clone for ActionSetFactory<E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Engine> ActionSetFactory<E> {
    pub fn new(manager: Rc<ConnectionManager<E>>, config: Option<DatabaseConfig>) -> Self {
        Self { manager, config }
    }

    /// Bind `collection`. `config` overrides the factory's own config.
    pub fn for_collection<T>(&self, collection: &str, config: Option<&DatabaseConfig>) -> ActionSet<T, E>
    where
        T: Serialize + DeserializeOwned,
    {
        ActionSet {
            manager: self.manager.clone(),
            collection: collection.to_string(),
            config: config.cloned().or_else(|| self.config.clone()),
            _record: PhantomData,
        }
    }

    pub fn config(&self) -> Option<&DatabaseConfig> {
        self.config.as_ref()
    }

    pub fn manager(&self) -> &Rc<ConnectionManager<E>> {
        &self.manager
    }
}

/// CRUD and query operations over one collection, with records of type `T`.
pub struct ActionSet<T, E: Engine> {
    manager: Rc<ConnectionManager<E>>,
    collection: String,
    config: Option<DatabaseConfig>,
    _record: PhantomData<fn() -> T>,
}

impl<T, E: Engine> Clone for ActionSet<T, E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            collection: self.collection.clone(),
            config: self.config.clone(),
            _record: PhantomData,
        }
    }
}

impl<T, E> ActionSet<T, E>
where
    T: Serialize + DeserializeOwned,
    E: Engine,
{
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Record with primary key `id`.
    pub async fn get_by_id(&self, id: impl Into<Key>) -> Result<Option<T>> {
        let id = id.into();
        let tx = self.begin("get_by_id", TxMode::ReadOnly).await?;
        let found = tx.request("get", tx.store().get(&id).await)?;
        tx.finish().await?;
        found.map(decode).transpose()
    }

    /// First record whose `index` value equals `value`.
    pub async fn get_one_by_index(&self, index: &str, value: impl Into<Key>) -> Result<Option<T>> {
        let value = value.into();
        let tx = self.begin("get_one_by_index", TxMode::ReadOnly).await?;
        let found = tx.request("index get", tx.store().index_get(index, &value).await)?;
        tx.finish().await?;
        found.map(decode).transpose()
    }

    /// Every record whose `index` value equals `value`.
    pub async fn get_many_by_index(&self, index: &str, value: impl Into<Key>) -> Result<Vec<T>> {
        let value = value.into();
        let tx = self.begin("get_many_by_index", TxMode::ReadOnly).await?;
        let found = tx.request("index getAll", tx.store().index_get_all(index, &value).await)?;
        tx.finish().await?;
        decode_all(found)
    }

    /// Every record in the collection, in primary key order.
    pub async fn get_all(&self) -> Result<Vec<T>> {
        let tx = self.begin("get_all", TxMode::ReadOnly).await?;
        let found = tx.request("getAll", tx.store().get_all().await)?;
        tx.finish().await?;
        decode_all(found)
    }

    pub async fn count(&self) -> Result<u64> {
        let tx = self.begin("count", TxMode::ReadOnly).await?;
        let count = tx.request("count", tx.store().count().await)?;
        tx.finish().await?;
        Ok(count)
    }

    /// Insert `value`; fails if its key already exists.
    pub async fn add(&self, value: &T, key: Option<Key>) -> Result<Key> {
        let record = serde_json::to_value(value)?;
        let tx = self.begin("add", TxMode::ReadWrite).await?;
        let key = tx.request("add", tx.store().add(&record, key.as_ref()).await)?;
        self.commit(tx).await?;
        Ok(key)
    }

    /// Insert or replace `value`.
    pub async fn update(&self, value: &T, key: Option<Key>) -> Result<Key> {
        let record = serde_json::to_value(value)?;
        let tx = self.begin("update", TxMode::ReadWrite).await?;
        let key = tx.request("put", tx.store().put(&record, key.as_ref()).await)?;
        self.commit(tx).await?;
        Ok(key)
    }

    /// Delete the record with primary key `id`; succeeds if it is absent.
    pub async fn delete_by_id(&self, id: impl Into<Key>) -> Result<()> {
        let id = id.into();
        let tx = self.begin("delete_by_id", TxMode::ReadWrite).await?;
        tx.request("delete", tx.store().delete(&id).await)?;
        self.commit(tx).await
    }

    /// Remove every record in the collection.
    pub async fn delete_all(&self) -> Result<()> {
        let tx = self.begin("delete_all", TxMode::ReadWrite).await?;
        tx.request("clear", tx.store().clear().await)?;
        self.commit(tx).await
    }

    /// Visit at most the first row in `range`, then complete.
    ///
    /// `on_row` is called exactly once: with the first matching row, or with
    /// `None` when nothing matches. Use [`ActionSet::iterate_all`] to walk
    /// every row.
    pub async fn open_cursor(
        &self,
        on_row: impl FnOnce(Option<Row<T>>),
        range: Option<KeyRange>,
    ) -> Result<()> {
        let first = self.peek_first(range).await?;
        on_row(first);
        Ok(())
    }

    /// The first row in `range`, in key order.
    pub async fn peek_first(&self, range: Option<KeyRange>) -> Result<Option<Row<T>>> {
        let tx = self.begin("peek_first", TxMode::ReadOnly).await?;
        let mut cursor = tx.request("openCursor", tx.store().open_cursor(range.as_ref()).await)?;
        let first = tx.request("cursor", cursor.next().await)?;
        drop(cursor);
        tx.finish().await?;
        first.map(decode_row).transpose()
    }

    /// Call `on_row` for every row in `range`, in key order. Returns how many
    /// rows were visited.
    ///
    /// `on_row` runs between cursor steps and cannot await: the transaction
    /// has to stay busy for the browser engine to keep it open.
    pub async fn iterate_all(
        &self,
        range: Option<KeyRange>,
        mut on_row: impl FnMut(Row<T>),
    ) -> Result<usize> {
        let tx = self.begin("iterate_all", TxMode::ReadOnly).await?;
        let mut cursor = tx.request("openCursor", tx.store().open_cursor(range.as_ref()).await)?;
        let mut visited = 0;
        while let Some(row) = tx.request("cursor", cursor.next().await)? {
            on_row(decode_row(row)?);
            visited += 1;
        }
        drop(cursor);
        tx.finish().await?;
        Ok(visited)
    }

    async fn begin(&self, op: &str, mode: TxMode) -> Result<Transaction<EngineTx<E>>> {
        let handle = self.manager.connect(self.config.as_ref()).await?;
        debug!(collection = %self.collection, op, "{} action", prefix::DB);
        Transaction::begin(&handle, mode, &self.collection)
    }

    async fn commit(&self, tx: Transaction<EngineTx<E>>) -> Result<()> {
        // the engine auto-commits anyway; an explicit commit that fails is not fatal
        if let Err(e) = tx.commit() {
            debug!(collection = %self.collection, error = %e, "{} explicit commit skipped", prefix::DB);
        }
        tx.finish().await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_all<T: DeserializeOwned>(values: Vec<Value>) -> Result<Vec<T>> {
    values.into_iter().map(decode).collect()
}

fn decode_row<T: DeserializeOwned>(row: crate::engine::CursorRow) -> Result<Row<T>> {
    Ok(Row {
        key: row.key,
        value: decode(row.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;
    use crate::engine::MemoryEngine;
    use crate::error::{Precondition, StoreError};
    use crate::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        title: String,
    }

    fn item(id: &str, title: &str) -> Item {
        Item {
            id: id.into(),
            title: title.into(),
        }
    }

    fn items() -> ActionSet<Item, MemoryEngine> {
        let config = DatabaseConfig::new("app-db", 1).store(
            CollectionConfig::new("items")
                .key_path("id")
                .index(IndexConfig::new("by_title", "title")),
        );
        let manager = Rc::new(ConnectionManager::new(
            MemoryEngine::new(),
            MemoryConfigStore::new(),
        ));
        ActionSetFactory::new(manager, Some(config)).for_collection("items", None)
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let items = items();
        let key = items.add(&item("a1", "X"), None).await.unwrap();
        assert_eq!(key, Key::from("a1"));
        assert_eq!(items.get_by_id("a1").await.unwrap(), Some(item("a1", "X")));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let items = items();
        assert_eq!(items.get_by_id("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_duplicate_fails() {
        let items = items();
        items.add(&item("a1", "X"), None).await.unwrap();
        let err = items.add(&item("a1", "Y"), None).await.unwrap_err();
        assert_eq!(err.engine_error_name(), Some("ConstraintError"));
        assert_eq!(items.get_by_id("a1").await.unwrap(), Some(item("a1", "X")));
    }

    #[tokio::test]
    async fn test_update_is_upsert() {
        let items = items();
        items.update(&item("a1", "X"), None).await.unwrap();
        items.update(&item("a1", "Y"), None).await.unwrap();
        assert_eq!(items.get_all().await.unwrap(), vec![item("a1", "Y")]);
    }

    #[tokio::test]
    async fn test_missing_collection_short_circuits() {
        let items = items();
        let missing: ActionSet<Item, MemoryEngine> = ActionSet {
            collection: "missing".into(),
            ..items.clone()
        };
        let err = missing.get_all().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::PreconditionFailed(Precondition::CollectionNotFound(ref name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_decode_mismatch_is_serialization_error() {
        let items = items();
        items.add(&item("a1", "X"), None).await.unwrap();

        #[derive(Debug, Serialize, Deserialize)]
        struct Wrong {
            year: u32,
        }
        let wrong: ActionSet<Wrong, MemoryEngine> = ActionSet {
            manager: items.manager.clone(),
            collection: items.collection.clone(),
            config: items.config.clone(),
            _record: PhantomData,
        };
        assert!(matches!(
            wrong.get_all().await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_open_cursor_visits_first_row_only() {
        let items = items();
        for (id, title) in [("b", "B"), ("a", "A"), ("c", "C")] {
            items.add(&item(id, title), None).await.unwrap();
        }

        let mut calls = Vec::new();
        items
            .open_cursor(|row| calls.push(row.map(|r| r.key)), None)
            .await
            .unwrap();
        assert_eq!(calls, vec![Some(Key::from("a"))]);
    }

    #[tokio::test]
    async fn test_open_cursor_on_empty_range() {
        let items = items();
        let mut calls = 0;
        let mut got = Some(());
        items
            .open_cursor(
                |row| {
                    calls += 1;
                    got = row.map(|_| ());
                },
                Some(KeyRange::only("zzz")),
            )
            .await
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_iterate_all_in_key_order() {
        let items = items();
        for (id, title) in [("c", "C"), ("a", "A"), ("b", "B"), ("d", "D")] {
            items.add(&item(id, title), None).await.unwrap();
        }

        let mut titles = Vec::new();
        let visited = items
            .iterate_all(Some(KeyRange::lower_bound("b", false)), |row| {
                titles.push(row.value.title)
            })
            .await
            .unwrap();
        assert_eq!(visited, 3);
        assert_eq!(titles, vec!["B", "C", "D"]);
    }
}
