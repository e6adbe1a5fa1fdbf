//! IndexedDB engine for larder (browser WASM)
//!
//! Implements `larder_core`'s engine traits over the browser's IndexedDB, and
//! its config store over `localStorage`. Everything above the engine (schema
//! upgrades, connection caching, action sets, the provider) lives in
//! `larder-core` and behaves the same here as over the memory engine.
//!
//! Because IndexedDB commits a transaction as soon as it has no pending
//! requests, callers must not await anything other than the transaction's own
//! requests while it is open. The action sets in `larder-core` follow that
//! rule.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use larder_core::schema::{CollectionConfig, DatabaseConfig};
//! use larder_core::Provider;
//! use serde_json::{json, Value};
//!
//! let config = DatabaseConfig::new("app-db", 1)
//!     .store(CollectionConfig::new("items").key_path("id"));
//! let provider = Provider::new(Rc::new(larder_indexeddb::browser_manager()), config);
//! provider.mount().await?;
//!
//! let items = provider.actions::<Value>("items")?;
//! items.add(&json!({"id": "a1", "title": "X"}), None).await?;
//! ```

pub mod config_store;
pub mod engine;
pub mod error;
pub mod idb;

pub use config_store::LocalStorageConfigStore;
pub use engine::{IndexedDbCursor, IndexedDbEngine, IndexedDbHandle, IndexedDbTransaction};
pub use error::{IndexedDbError, Result};

use larder_core::ConnectionManager;

/// Connection manager over IndexedDB that remembers its config in `localStorage`.
pub fn browser_manager() -> ConnectionManager<IndexedDbEngine> {
    ConnectionManager::new(IndexedDbEngine::new(), LocalStorageConfigStore::new())
}
