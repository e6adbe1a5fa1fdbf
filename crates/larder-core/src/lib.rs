//! Larder Core
//!
//! A typed persistence layer over a transactional, versioned object-store
//! engine. The same code drives the browser's IndexedDB (through the
//! `larder-indexeddb` crate) and the in-memory engine used natively and in
//! tests.
//!
//! # Layers
//!
//! - [`schema`] - declarative database config and the upgrade that applies it
//! - [`connection`] - open/upgrade/cache the single connection
//! - [`transaction`] - target validation and scoped transactions
//! - [`actions`] - typed CRUD and query operations over one collection
//! - [`provider`] - mount-time initialization and the shared context
//! - [`identity`] - random identifiers for new records
//!
//! # Features
//!
//! - `subscriber` (default) - native log output via `tracing-subscriber`
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use larder_core::{ConnectionManager, MemoryConfigStore, MemoryEngine, Provider};
//! use larder_core::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
//! use serde_json::{json, Value};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let config = DatabaseConfig::new("movies", 1).store(
//!     CollectionConfig::new("favorites")
//!         .key_path("guid")
//!         .index(IndexConfig::new("imdb_id", "imdb_id").unique(true)),
//! );
//! let manager = Rc::new(ConnectionManager::new(MemoryEngine::new(), MemoryConfigStore::new()));
//! let provider = Provider::new(manager, config);
//! provider.mount().await.unwrap();
//!
//! let favorites = provider.actions::<Value>("favorites").unwrap();
//! let record = larder_core::with_guid(json!({"imdb_id": "tt0111161"}));
//! favorites.add(&record, None).await.unwrap();
//! assert!(favorites.get_one_by_index("imdb_id", "tt0111161").await.unwrap().is_some());
//! # });
//! ```

pub mod actions;
pub mod config_store;
pub mod connection;
pub mod engine;
pub mod error;
pub mod identity;
pub mod key;
pub mod logging;
pub mod provider;
pub mod schema;
pub mod transaction;

// Re-export main types at crate root
pub use actions::{ActionSet, ActionSetFactory, Row};
pub use config_store::{ConfigStore, MemoryConfigStore, CONFIG_KEY};
pub use connection::{ConnectionManager, OpenOutcome};
pub use engine::{Engine, EngineError, MemoryEngine, TxMode};
pub use error::{Precondition, Result, StoreError};
pub use identity::{guid, with_guid, WithGuid};
pub use key::{Key, KeyRange};
pub use provider::{Context, Provider, ProviderState};
pub use schema::{CollectionConfig, DatabaseConfig, IndexConfig, KeyPolicy, UpgradeReport};
pub use transaction::{validate_target, with_transaction, Transaction, TransactionHooks};
