//! Larder WASM bridge
//!
//! Exposes a process-wide [`Provider`] over IndexedDB to JavaScript. Every
//! function is a promise that takes and returns JSON strings: records are
//! JSON objects and keys are JSON scalars or arrays (`"\"a1\""`, `"42"`).
//! Failures reject with the error's display text.
//!
//! ```js
//! await init_store(JSON.stringify({
//!   name: "app-db", version: 1,
//!   stores: [{ name: "items", primaryKey: { keyPath: "id" }, indices: [] }],
//! }));
//! await add("items", JSON.stringify({ id: "a1", title: "X" }));
//! const item = JSON.parse(await get_by_id("items", JSON.stringify("a1")));
//! ```

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use larder_core::config_store::load_config;
use larder_core::schema::DatabaseConfig;
use larder_core::{ActionSet, Key, Provider, Row, StoreError};
use larder_indexeddb::{browser_manager, IndexedDbEngine, LocalStorageConfigStore};
use serde_json::{json, Value};
use tracing::info;
use wasm_bindgen::prelude::*;

type Records = ActionSet<Value, IndexedDbEngine>;

// Rc<RefCell<>> because WASM is single-threaded and the provider is shared across async calls
thread_local! {
    static PROVIDER: RefCell<Option<Rc<Provider<IndexedDbEngine>>>> = RefCell::new(None);
}

fn js_err(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Open the database and mount the provider. Must be called before any
/// other function.
///
/// Without `config_json` the config stored by a previous session is used.
#[wasm_bindgen]
pub async fn init_store(config_json: Option<String>) -> Result<(), JsValue> {
    // Route Rust panics to console.error instead of "RuntimeError: unreachable"
    console_error_panic_hook::set_once();

    if PROVIDER.with(|p| p.borrow().is_some()) {
        return Err(JsValue::from_str("Store already initialized"));
    }

    let config = resolve_config(config_json.as_deref()).map_err(js_err)?;
    let provider = Provider::new(Rc::new(browser_manager()), config);
    provider.mount().await.map_err(js_err)?;
    info!(db = %provider.config().name, "store initialized");

    PROVIDER.with(|p| {
        let mut p = p.borrow_mut();
        if p.is_some() {
            return Err(JsValue::from_str("Store already initialized"));
        }
        *p = Some(Rc::new(provider));
        Ok(())
    })
}

fn resolve_config(config_json: Option<&str>) -> Result<DatabaseConfig, StoreError> {
    match config_json {
        Some(json) => DatabaseConfig::from_json(json),
        None => load_config(&LocalStorageConfigStore::new())?.ok_or_else(|| {
            StoreError::Config("no database configuration supplied and none stored".into())
        }),
    }
}

fn actions(collection: &str) -> Result<Records, JsValue> {
    let provider = PROVIDER
        .with(|p| p.borrow().clone())
        .ok_or_else(|| JsValue::from_str("Store not initialized. Call init_store() first."))?;
    provider.actions(collection).map_err(js_err)
}

fn parse_key(json: &str) -> Result<Key, StoreError> {
    let value: Value = serde_json::from_str(json)?;
    Key::try_from(&value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_record(json: &str) -> Result<Value, StoreError> {
    Ok(serde_json::from_str(json)?)
}

fn to_json(value: &Value) -> String {
    value.to_string()
}

fn row_json(row: Row<Value>) -> String {
    json!({ "key": row.key.to_value(), "value": row.value }).to_string()
}

// ============================================================================
// Reads
// ============================================================================

/// Record by primary key, or null.
#[wasm_bindgen]
pub async fn get_by_id(collection: &str, key_json: &str) -> Result<Option<String>, JsValue> {
    let key = parse_key(key_json).map_err(js_err)?;
    let found = actions(collection)?.get_by_id(key).await.map_err(js_err)?;
    Ok(found.as_ref().map(to_json))
}

/// First record whose `index` value equals the given key, or null.
#[wasm_bindgen]
pub async fn get_one_by_index(
    collection: &str,
    index: &str,
    key_json: &str,
) -> Result<Option<String>, JsValue> {
    let key = parse_key(key_json).map_err(js_err)?;
    let found = actions(collection)?
        .get_one_by_index(index, key)
        .await
        .map_err(js_err)?;
    Ok(found.as_ref().map(to_json))
}

/// JSON array of every record whose `index` value equals the given key.
#[wasm_bindgen]
pub async fn get_many_by_index(
    collection: &str,
    index: &str,
    key_json: &str,
) -> Result<String, JsValue> {
    let key = parse_key(key_json).map_err(js_err)?;
    let found = actions(collection)?
        .get_many_by_index(index, key)
        .await
        .map_err(js_err)?;
    Ok(to_json(&Value::Array(found)))
}

/// JSON array of every record, in primary key order.
#[wasm_bindgen]
pub async fn get_all(collection: &str) -> Result<String, JsValue> {
    let found = actions(collection)?.get_all().await.map_err(js_err)?;
    Ok(to_json(&Value::Array(found)))
}

#[wasm_bindgen]
pub async fn count(collection: &str) -> Result<f64, JsValue> {
    let n = actions(collection)?.count().await.map_err(js_err)?;
    Ok(n as f64)
}

/// `{"key": ..., "value": ...}` for the first record, or null.
#[wasm_bindgen]
pub async fn peek_first(collection: &str) -> Result<Option<String>, JsValue> {
    let first = actions(collection)?.peek_first(None).await.map_err(js_err)?;
    Ok(first.map(row_json))
}

// ============================================================================
// Writes
// ============================================================================

/// Insert a record. Resolves to the JSON key it was stored under.
#[wasm_bindgen]
pub async fn add(
    collection: &str,
    record_json: &str,
    key_json: Option<String>,
) -> Result<String, JsValue> {
    let record = parse_record(record_json).map_err(js_err)?;
    let key = key_json.as_deref().map(parse_key).transpose().map_err(js_err)?;
    let stored = actions(collection)?.add(&record, key).await.map_err(js_err)?;
    Ok(to_json(&stored.to_value()))
}

/// Insert or replace a record. Resolves to the JSON key it was stored under.
#[wasm_bindgen]
pub async fn update(
    collection: &str,
    record_json: &str,
    key_json: Option<String>,
) -> Result<String, JsValue> {
    let record = parse_record(record_json).map_err(js_err)?;
    let key = key_json.as_deref().map(parse_key).transpose().map_err(js_err)?;
    let stored = actions(collection)?
        .update(&record, key)
        .await
        .map_err(js_err)?;
    Ok(to_json(&stored.to_value()))
}

#[wasm_bindgen]
pub async fn delete_by_id(collection: &str, key_json: &str) -> Result<(), JsValue> {
    let key = parse_key(key_json).map_err(js_err)?;
    actions(collection)?.delete_by_id(key).await.map_err(js_err)
}

#[wasm_bindgen]
pub async fn delete_all(collection: &str) -> Result<(), JsValue> {
    actions(collection)?.delete_all().await.map_err(js_err)
}

// ============================================================================
// Identity
// ============================================================================

/// A random v4 identifier.
#[wasm_bindgen]
pub fn generate_guid() -> String {
    larder_core::guid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("\"a1\"").unwrap(), Key::from("a1"));
        assert_eq!(parse_key("42").unwrap(), Key::from(42));
        assert_eq!(
            parse_key("[1, \"x\"]").unwrap(),
            Key::Array(vec![Key::from(1), Key::from("x")])
        );
        assert!(parse_key("{\"a\": 1}").is_err());
        assert!(parse_key("not json").is_err());
    }

    #[test]
    fn test_row_json() {
        let row = Row {
            key: Key::from(7),
            value: json!({"title": "X"}),
        };
        assert_eq!(row_json(row), r#"{"key":7,"value":{"title":"X"}}"#);
    }

    #[test]
    fn test_resolve_supplied_config() {
        let config = resolve_config(Some(r#"{"databaseName": "app-db", "version": 2}"#)).unwrap();
        assert_eq!(config.name, "app-db");
        assert_eq!(config.version, 2);
    }

    #[test]
    fn test_generate_guid() {
        assert_eq!(generate_guid().len(), 36);
    }
}
