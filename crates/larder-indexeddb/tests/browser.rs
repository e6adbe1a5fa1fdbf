//! IndexedDB engine tests (run with `wasm-pack test --headless --chrome`)

#![cfg(target_arch = "wasm32")]

use std::rc::Rc;

use larder_core::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
use larder_core::{
    ActionSetFactory, ConfigStore, ConnectionManager, Key, KeyRange, MemoryConfigStore, Precondition,
    StoreError, CONFIG_KEY,
};
use larder_indexeddb::{IndexedDbEngine, LocalStorageConfigStore};
use serde_json::{json, Value};
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn config(name: &str, version: u32) -> DatabaseConfig {
    DatabaseConfig::new(name, version).store(
        CollectionConfig::new("items")
            .key_path("id")
            .index(IndexConfig::new("by_title", "title")),
    )
}

async fn fresh(name: &str) -> Rc<ConnectionManager<IndexedDbEngine>> {
    let manager = Rc::new(ConnectionManager::new(
        IndexedDbEngine::new(),
        MemoryConfigStore::new(),
    ));
    manager.delete_database(name).await.unwrap();
    manager
}

#[wasm_bindgen_test]
async fn test_add_get_roundtrip() {
    let manager = fresh("larder-test-crud").await;
    let factory = ActionSetFactory::new(manager, Some(config("larder-test-crud", 1)));
    let items = factory.for_collection::<Value>("items", None);

    items
        .add(&json!({"id": "a1", "title": "X"}), None)
        .await
        .unwrap();
    assert_eq!(
        items.get_by_id("a1").await.unwrap(),
        Some(json!({"id": "a1", "title": "X"}))
    );
    assert_eq!(items.get_by_id("missing").await.unwrap(), None);
}

#[wasm_bindgen_test]
async fn test_duplicate_add_is_constraint_error() {
    let manager = fresh("larder-test-dup").await;
    let factory = ActionSetFactory::new(manager, Some(config("larder-test-dup", 1)));
    let items = factory.for_collection::<Value>("items", None);

    items.add(&json!({"id": "a1"}), None).await.unwrap();
    let err = items.add(&json!({"id": "a1"}), None).await.unwrap_err();
    assert_eq!(err.engine_error_name(), Some("ConstraintError"));
}

#[wasm_bindgen_test]
async fn test_missing_collection() {
    let manager = fresh("larder-test-missing").await;
    let factory = ActionSetFactory::new(manager, Some(config("larder-test-missing", 1)));
    let missing = factory.for_collection::<Value>("missing", None);

    let err = missing.get_all().await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::PreconditionFailed(Precondition::CollectionNotFound(_))
    ));
}

#[wasm_bindgen_test]
async fn test_index_and_cursor() {
    let manager = fresh("larder-test-cursor").await;
    let factory = ActionSetFactory::new(manager, Some(config("larder-test-cursor", 1)));
    let items = factory.for_collection::<Value>("items", None);

    for (id, title) in [("c", "Emma"), ("a", "Dune"), ("b", "Dune")] {
        items
            .add(&json!({"id": id, "title": title}), None)
            .await
            .unwrap();
    }

    let dunes = items.get_many_by_index("by_title", "Dune").await.unwrap();
    assert_eq!(dunes.len(), 2);

    let mut keys = Vec::new();
    let visited = items
        .iterate_all(Some(KeyRange::lower_bound("b", false)), |row| {
            keys.push(row.key)
        })
        .await
        .unwrap();
    assert_eq!(visited, 2);
    assert_eq!(keys, vec![Key::from("b"), Key::from("c")]);
}

#[wasm_bindgen_test]
async fn test_upgrade_keeps_records() {
    let manager = fresh("larder-test-upgrade").await;
    let v1 = DatabaseConfig::new("larder-test-upgrade", 1)
        .store(CollectionConfig::new("items").key_path("id"));

    let old = ActionSetFactory::new(manager.clone(), Some(v1));
    old.for_collection::<Value>("items", None)
        .add(&json!({"id": "a1", "title": "X"}), None)
        .await
        .unwrap();

    let new = ActionSetFactory::new(manager, Some(config("larder-test-upgrade", 2)));
    let items = new.for_collection::<Value>("items", None);
    let found = items.get_one_by_index("by_title", "X").await.unwrap();
    assert_eq!(found, Some(json!({"id": "a1", "title": "X"})));
}

#[wasm_bindgen_test]
fn test_local_storage_config_store() {
    let store = LocalStorageConfigStore::new();
    store.save(CONFIG_KEY, "{}").unwrap();
    assert_eq!(store.load(CONFIG_KEY).unwrap().as_deref(), Some("{}"));
    store.remove(CONFIG_KEY).unwrap();
    assert!(store.load(CONFIG_KEY).unwrap().is_none());
}
