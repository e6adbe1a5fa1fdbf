//! Durable string store for the last-used database configuration
//!
//! The connection manager keeps a serialized copy of the config it last opened
//! with, so a later open can reconnect without being handed the schema again.
//! In the browser this is `localStorage`; [`MemoryConfigStore`] stands in for
//! it everywhere else.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;
use crate::schema::DatabaseConfig;

/// Key the config copy is stored under.
pub const CONFIG_KEY: &str = "client_db_config";

/// Get/set-by-key string storage. Global and unlocked: last writer wins.
pub trait ConfigStore {
    fn load(&self, key: &str) -> Result<Option<String>>;

    fn save(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory [`ConfigStore`]. Clones share entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Read back the stored config, if any.
pub fn load_config(store: &dyn ConfigStore) -> Result<Option<DatabaseConfig>> {
    match store.load(CONFIG_KEY)? {
        Some(json) => Ok(Some(DatabaseConfig::from_json(&json)?)),
        None => Ok(None),
    }
}

/// Persist `config` as the last-used config.
pub fn save_config(store: &dyn ConfigStore, config: &DatabaseConfig) -> Result<()> {
    store.save(CONFIG_KEY, &config.to_json()?)
}
