//! Error types for the IndexedDB engine

use larder_core::{EngineError, StoreError};
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Result type for IndexedDB helpers
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors raised while talking to IndexedDB or localStorage
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// A request or transaction failed with a DOMException
    #[error("{name}: {message}")]
    Dom { name: String, message: String },

    /// localStorage is missing or refused the operation
    #[error("localStorage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Any other thrown JavaScript value
    #[error("JS error: {0}")]
    JsValue(String),
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        if let Some(e) = val.dyn_ref::<DomException>() {
            return IndexedDbError::Dom {
                name: e.name(),
                message: e.message(),
            };
        }
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        IndexedDbError::JsValue(msg)
    }
}

/// Engine-level view of a failure; DOMException names pass through unchanged.
impl From<IndexedDbError> for EngineError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::Dom { name, message } => EngineError::new(name, message),
            IndexedDbError::Json(e) => EngineError::data(e.to_string()),
            other => EngineError::unknown(other.to_string()),
        }
    }
}

impl From<IndexedDbError> for StoreError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::NotAvailable(msg) => StoreError::EngineUnavailable(msg),
            IndexedDbError::Storage(msg) => StoreError::ConfigStore(msg),
            IndexedDbError::Json(e) => StoreError::Serialization(e.to_string()),
            other => StoreError::Connection(other.into()),
        }
    }
}

/// Map a thrown JS value straight to an [`EngineError`].
pub(crate) fn js_error(val: JsValue) -> EngineError {
    IndexedDbError::from(val).into()
}
