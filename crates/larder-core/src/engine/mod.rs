//! Storage engine abstraction
//!
//! The persistence layer talks to a transactional object-store engine through
//! the traits in this module. Implementations exist for:
//!
//! - **Memory**: single-threaded in-memory engine for tests and native hosts
//!   ([`MemoryEngine`])
//! - **IndexedDB**: the browser engine (separate crate, WASM only)
//!
//! Every engine call is asynchronous and settles exactly once with either a
//! value or an [`EngineError`]. Engines are single-threaded: none of the
//! futures or handles here are required to be `Send`.

use std::fmt;

use serde_json::Value;

use crate::key::{Key, KeyRange};
use crate::schema::{IndexConfig, KeyPolicy};

mod memory;

pub use memory::{MemoryCursor, MemoryEngine, MemoryHandle, MemoryTransaction};

/// Named engine failure, mirroring the engine's own error names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub name: String,
    pub message: String,
}

impl EngineError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// A uniqueness constraint was violated.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new("ConstraintError", message)
    }

    /// A key or record was not acceptable.
    pub fn data(message: impl Into<String>) -> Self {
        Self::new("DataError", message)
    }

    /// A named collection or index does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }

    /// The requested version is lower than the stored one.
    pub fn version(message: impl Into<String>) -> Self {
        Self::new("VersionError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    /// A write was issued inside a read-only transaction.
    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new("ReadOnlyError", message)
    }

    pub fn inactive(message: impl Into<String>) -> Self {
        Self::new("TransactionInactiveError", message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new("AbortError", message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new("UnknownError", message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Transaction mode. Reads use `ReadOnly`, mutations `ReadWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxMode::ReadOnly => f.write_str("readonly"),
            TxMode::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Completed,
    Failed(EngineError),
    Aborted,
}

/// Version bump seen by an upgrade callback. `old` is 0 for a new database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old: u32,
    pub new: u32,
}

/// A row visited by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRow {
    pub key: Key,
    pub value: Value,
}

/// Callback run inside the engine's upgrade window.
///
/// Returning an error aborts the upgrade; the database keeps its previous
/// schema and version.
pub type UpgradeFn = Box<dyn FnOnce(&mut dyn SchemaEditor, VersionChange) -> Result<(), EngineError>>;

/// Schema operations available while an upgrade is running.
pub trait SchemaEditor {
    fn collection_names(&self) -> Vec<String>;

    fn index_names(&self, collection: &str) -> Result<Vec<String>, EngineError>;

    fn create_collection(&mut self, name: &str, policy: &KeyPolicy) -> Result<(), EngineError>;

    /// Create an index on an existing collection, indexing the records it already holds.
    fn create_index(&mut self, collection: &str, index: &IndexConfig) -> Result<(), EngineError>;
}

/// A platform object-store engine.
#[allow(async_fn_in_trait)]
pub trait Engine {
    type Handle: Handle;

    /// Whether the engine exists in this execution environment.
    fn is_available(&self) -> bool;

    /// Open `name` at `version`, running `upgrade` first when `version` is
    /// higher than the stored one (or the database is new).
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeFn,
    ) -> Result<Self::Handle, EngineError>;

    /// Remove a database and all of its collections.
    async fn delete_database(&self, name: &str) -> Result<(), EngineError>;
}

/// An open, versioned database.
pub trait Handle: Clone {
    type Transaction: EngineTransaction;

    fn name(&self) -> String;

    fn version(&self) -> u32;

    fn collection_names(&self) -> Vec<String>;

    fn has_collection(&self, name: &str) -> bool {
        self.collection_names().iter().any(|n| n == name)
    }

    fn index_names(&self, collection: &str) -> Result<Vec<String>, EngineError>;

    /// Start a transaction scoped to exactly one collection.
    fn transaction(&self, collection: &str, mode: TxMode)
        -> Result<Self::Transaction, EngineError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A transaction over a single collection.
///
/// A request that fails marks the transaction failed; `finish` then reports
/// `TxOutcome::Failed` and none of its writes are applied.
#[allow(async_fn_in_trait)]
pub trait EngineTransaction {
    type Cursor: EngineCursor;

    fn mode(&self) -> TxMode;

    async fn get(&self, key: &Key) -> Result<Option<Value>, EngineError>;

    /// First record (in primary key order) whose `index` value equals `key`.
    async fn index_get(&self, index: &str, key: &Key) -> Result<Option<Value>, EngineError>;

    async fn index_get_all(&self, index: &str, key: &Key) -> Result<Vec<Value>, EngineError>;

    async fn get_all(&self) -> Result<Vec<Value>, EngineError>;

    async fn count(&self) -> Result<u64, EngineError>;

    /// Insert; fails with `ConstraintError` if the key exists.
    async fn add(&self, value: &Value, key: Option<&Key>) -> Result<Key, EngineError>;

    /// Insert or replace.
    async fn put(&self, value: &Value, key: Option<&Key>) -> Result<Key, EngineError>;

    /// Delete by key; deleting an absent key succeeds.
    async fn delete(&self, key: &Key) -> Result<(), EngineError>;

    async fn clear(&self) -> Result<(), EngineError>;

    async fn open_cursor(&self, range: Option<&KeyRange>) -> Result<Self::Cursor, EngineError>;

    /// Ask the engine to commit once pending requests are done.
    fn commit(&self) -> Result<(), EngineError>;

    fn abort(&self) -> Result<(), EngineError>;

    /// Wait for the transaction to complete, fail or abort.
    async fn finish(self) -> TxOutcome;
}

/// Ascending traversal over the rows of a collection.
#[allow(async_fn_in_trait)]
pub trait EngineCursor {
    async fn next(&mut self) -> Result<Option<CursorRow>, EngineError>;
}
