//! Database schema descriptors
//!
//! A [`DatabaseConfig`] is the single source of truth for a database's shape:
//! its name, its version and the collections (object stores) it holds. Bumping
//! `version` is what makes the engine run an upgrade; [`apply_upgrade`] then
//! creates whatever the config declares that the engine does not have yet.
//!
//! The JSON form accepts the field names browser-side code already uses
//! (`databaseName`, `id: { keyPath, autoIncrement }`, index `name` and
//! `options: { unique }`), so a config written for the JavaScript wrapper
//! parses unchanged.
//!
//! # Example
//!
//! ```rust
//! use larder_core::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
//!
//! let config = DatabaseConfig::new("app-db", 1).store(
//!     CollectionConfig::new("items")
//!         .key_path("id")
//!         .index(IndexConfig::new("by_title", "title")),
//! );
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, SchemaEditor};
use crate::error::{Result, StoreError};

/// Name, version and collections of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(alias = "databaseName")]
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<CollectionConfig>,
}

/// A named collection with its primary key policy and secondary indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(rename = "primaryKey", alias = "id", default)]
    pub primary_key: KeyPolicy,
    #[serde(default)]
    pub indices: Vec<IndexConfig>,
}

/// Where a collection's primary keys come from.
///
/// - `key_path` set: the key is read from the record (inline key)
/// - `auto_generate` set: missing keys come from the collection's key generator
/// - neither: every write supplies an explicit key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, alias = "autoIncrement")]
    pub auto_generate: bool,
}

/// A secondary lookup path over a collection's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawIndexConfig")]
pub struct IndexConfig {
    #[serde(rename = "indexName")]
    pub name: String,
    pub key_path: String,
    pub unique: bool,
    /// Index every element of an array value separately.
    pub multi_entry: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndexConfig {
    #[serde(alias = "name")]
    index_name: String,
    key_path: String,
    #[serde(default)]
    unique: Option<bool>,
    #[serde(default)]
    multi_entry: Option<bool>,
    #[serde(default)]
    options: Option<RawIndexOptions>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndexOptions {
    #[serde(default)]
    unique: Option<bool>,
    #[serde(default)]
    multi_entry: Option<bool>,
}

impl From<RawIndexConfig> for IndexConfig {
    fn from(raw: RawIndexConfig) -> Self {
        let options = raw.options.unwrap_or_default();
        Self {
            name: raw.index_name,
            key_path: raw.key_path,
            unique: raw.unique.or(options.unique).unwrap_or(false),
            multi_entry: raw.multi_entry.or(options.multi_entry).unwrap_or(false),
        }
    }
}

impl DatabaseConfig {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    /// Add a collection.
    pub fn store(mut self, collection: CollectionConfig) -> Self {
        self.stores.push(collection);
        self
    }

    /// Look up a declared collection by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionConfig> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Parse a config from its JSON form and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the structural rules a config has to satisfy before it is opened.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StoreError::Config("database name is empty".into()));
        }
        if self.version == 0 {
            return Err(StoreError::Config(format!(
                "database '{}': version must be a positive integer",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for store in &self.stores {
            if store.name.is_empty() {
                return Err(StoreError::Config(format!(
                    "database '{}': collection name is empty",
                    self.name
                )));
            }
            if !seen.insert(store.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "database '{}': collection '{}' declared twice",
                    self.name, store.name
                )));
            }
            store.validate()?;
        }
        Ok(())
    }
}

impl CollectionConfig {
    /// A collection that takes explicit keys until a key path or generator is set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: KeyPolicy::default(),
            indices: Vec::new(),
        }
    }

    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.primary_key.key_path = Some(path.into());
        self
    }

    pub fn auto_generate(mut self, enabled: bool) -> Self {
        self.primary_key.auto_generate = enabled;
        self
    }

    pub fn index(mut self, index: IndexConfig) -> Self {
        self.indices.push(index);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.primary_key.auto_generate && self.primary_key.key_path.as_deref() == Some("") {
            return Err(StoreError::Config(format!(
                "collection '{}': a generated key needs a non-empty key path",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for index in &self.indices {
            if index.name.is_empty() || index.key_path.is_empty() {
                return Err(StoreError::Config(format!(
                    "collection '{}': index name and key path must be non-empty",
                    self.name
                )));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "collection '{}': index '{}' declared twice",
                    self.name, index.name
                )));
            }
        }
        Ok(())
    }
}

impl KeyPolicy {
    /// Keys read from the record at `path`.
    pub fn inline(path: impl Into<String>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_generate: false,
        }
    }

    /// Keys from the key generator, written back at `path` when one is given.
    pub fn generated(path: Option<String>) -> Self {
        Self {
            key_path: path,
            auto_generate: true,
        }
    }
}

impl IndexConfig {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }
}

/// What an upgrade created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub created_collections: Vec<String>,
    /// `(collection, index)` pairs
    pub created_indices: Vec<(String, String)>,
}

impl UpgradeReport {
    pub fn is_empty(&self) -> bool {
        self.created_collections.is_empty() && self.created_indices.is_empty()
    }
}

/// Create every collection `config` declares that the engine lacks, and every
/// declared index missing from an existing collection. Existing collections,
/// indices and records are left alone.
pub fn apply_upgrade(
    editor: &mut dyn SchemaEditor,
    config: &DatabaseConfig,
) -> std::result::Result<UpgradeReport, EngineError> {
    let mut report = UpgradeReport::default();
    let existing = editor.collection_names();

    for store in &config.stores {
        let is_new = !existing.contains(&store.name);
        if is_new {
            editor.create_collection(&store.name, &store.primary_key)?;
            report.created_collections.push(store.name.clone());
        }

        let present = if is_new {
            Vec::new()
        } else {
            editor.index_names(&store.name)?
        };
        for index in &store.indices {
            if present.contains(&index.name) {
                continue;
            }
            editor.create_index(&store.name, index)?;
            report
                .created_indices
                .push((store.name.clone(), index.name.clone()));
        }
    }

    Ok(report)
}
