//! `localStorage`-backed config store

use larder_core::{ConfigStore, Result};
use web_sys::Storage;

use crate::error::IndexedDbError;

/// Keeps the last-used database config in `window.localStorage`.
///
/// Storage access is checked on every call; private browsing modes can
/// revoke it at any time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorageConfigStore;

impl LocalStorageConfigStore {
    pub fn new() -> Self {
        Self
    }

    fn storage(&self) -> std::result::Result<Storage, IndexedDbError> {
        let window =
            web_sys::window().ok_or_else(|| IndexedDbError::Storage("no window".into()))?;
        window
            .local_storage()
            .map_err(|_| IndexedDbError::Storage("localStorage access denied".into()))?
            .ok_or_else(|| IndexedDbError::Storage("localStorage is null".into()))
    }
}

impl ConfigStore for LocalStorageConfigStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let storage = self.storage()?;
        storage
            .get_item(key)
            .map_err(|e| storage_error("read", e).into())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let storage = self.storage()?;
        storage
            .set_item(key, value)
            .map_err(|e| storage_error("write", e).into())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let storage = self.storage()?;
        storage
            .remove_item(key)
            .map_err(|e| storage_error("remove", e).into())
    }
}

fn storage_error(op: &str, err: wasm_bindgen::JsValue) -> IndexedDbError {
    IndexedDbError::Storage(format!("{} failed: {}", op, IndexedDbError::from(err)))
}
