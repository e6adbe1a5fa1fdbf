//! CRUD operation tests for ActionSet over the memory engine

use std::rc::Rc;

use larder_core::engine::Handle;
use larder_core::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
use larder_core::{
    logging, ActionSet, ActionSetFactory, ConnectionManager, Key, KeyRange, MemoryConfigStore,
    MemoryEngine, Precondition, StoreError,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    title: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn item(id: &str, title: &str) -> Item {
    Item {
        id: id.into(),
        title: title.into(),
        tags: vec![],
    }
}

fn config() -> DatabaseConfig {
    DatabaseConfig::new("app-db", 1)
        .store(
            CollectionConfig::new("items")
                .key_path("id")
                .index(IndexConfig::new("by_title", "title"))
                .index(IndexConfig::new("by_tag", "tags").multi_entry(true)),
        )
        .store(CollectionConfig::new("counters").auto_generate(true))
}

fn factory() -> ActionSetFactory<MemoryEngine> {
    logging::try_init_with_filter("warn");
    let manager = Rc::new(ConnectionManager::new(
        MemoryEngine::new(),
        MemoryConfigStore::new(),
    ));
    ActionSetFactory::new(manager, Some(config()))
}

fn items(factory: &ActionSetFactory<MemoryEngine>) -> ActionSet<Item, MemoryEngine> {
    factory.for_collection("items", None)
}

#[tokio::test]
async fn test_add_and_get() {
    let factory = factory();
    let items = items(&factory);

    items.add(&item("a1", "X"), None).await.unwrap();

    let retrieved = items.get_by_id("a1").await.unwrap();
    assert_eq!(retrieved, Some(item("a1", "X")));
}

#[tokio::test]
async fn test_add_duplicate_fails() {
    let factory = factory();
    let items = items(&factory);

    items.add(&item("a1", "X"), None).await.unwrap();
    let result = items.add(&item("a1", "X"), None).await;

    let err = result.unwrap_err();
    assert!(matches!(err, StoreError::TransactionFailed(_)));
    assert_eq!(err.engine_error_name(), Some("ConstraintError"));
}

#[tokio::test]
async fn test_get_nonexistent() {
    let factory = factory();
    let items = items(&factory);
    assert_eq!(items.get_by_id("nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_update_replaces() {
    let factory = factory();
    let items = items(&factory);

    items.add(&item("a1", "X"), None).await.unwrap();
    items.update(&item("a1", "Y"), None).await.unwrap();

    assert_eq!(items.get_by_id("a1").await.unwrap(), Some(item("a1", "Y")));
    assert_eq!(items.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_same_value_is_idempotent() {
    let factory = factory();
    let items = items(&factory);

    let mut tagged = item("a1", "X");
    tagged.tags = vec!["t".into()];

    items.update(&tagged, None).await.unwrap();
    let once = items.get_all().await.unwrap();
    let once_by_tag = items.get_many_by_index("by_tag", "t").await.unwrap();

    items.update(&tagged, None).await.unwrap();
    assert_eq!(items.get_all().await.unwrap(), once);
    assert_eq!(items.get_many_by_index("by_tag", "t").await.unwrap(), once_by_tag);
    assert_eq!(items.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_by_id() {
    let factory = factory();
    let items = items(&factory);

    items.add(&item("a1", "X"), None).await.unwrap();
    items.add(&item("a2", "Y"), None).await.unwrap();

    items.delete_by_id("a1").await.unwrap();
    assert_eq!(items.get_by_id("a1").await.unwrap(), None);
    assert_eq!(items.count().await.unwrap(), 1);

    // deleting an absent key is not an error
    items.delete_by_id("a1").await.unwrap();
}

#[tokio::test]
async fn test_delete_all() {
    let factory = factory();
    let items = items(&factory);

    for i in 0..5 {
        items.add(&item(&format!("a{}", i), "X"), None).await.unwrap();
    }
    assert_eq!(items.count().await.unwrap(), 5);

    items.delete_all().await.unwrap();
    assert!(items.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_all_in_key_order() {
    let factory = factory();
    let items = items(&factory);

    for id in ["c", "a", "b"] {
        items.add(&item(id, id), None).await.unwrap();
    }

    let ids: Vec<String> = items
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_index_lookups() {
    let factory = factory();
    let items = items(&factory);

    items.add(&item("b", "Dune"), None).await.unwrap();
    items.add(&item("a", "Dune"), None).await.unwrap();
    items.add(&item("c", "Emma"), None).await.unwrap();

    let first = items.get_one_by_index("by_title", "Dune").await.unwrap();
    assert_eq!(first.map(|i| i.id), Some("a".to_string()));

    let many = items.get_many_by_index("by_title", "Dune").await.unwrap();
    assert_eq!(many.len(), 2);

    let none = items.get_one_by_index("by_title", "Ulysses").await.unwrap();
    assert_eq!(none, None);
}

#[tokio::test]
async fn test_multi_entry_index() {
    let factory = factory();
    let items = items(&factory);

    let mut tagged = item("a", "Dune");
    tagged.tags = vec!["scifi".into(), "classic".into()];
    items.add(&tagged, None).await.unwrap();
    items.add(&item("b", "Emma"), None).await.unwrap();

    let classics = items.get_many_by_index("by_tag", "classic").await.unwrap();
    assert_eq!(classics, vec![tagged]);
}

#[tokio::test]
async fn test_unknown_index_fails_transaction() {
    let factory = factory();
    let items = items(&factory);

    let err = items.get_one_by_index("by_year", 1965).await.unwrap_err();
    assert_eq!(err.engine_error_name(), Some("NotFoundError"));
}

#[tokio::test]
async fn test_missing_collection() {
    let factory = factory();
    let missing: ActionSet<Item, MemoryEngine> = factory.for_collection("missing", None);

    let err = missing.get_all().await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::PreconditionFailed(Precondition::CollectionNotFound(ref name)) if name == "missing"
    ));
    assert_eq!(err.to_string(), "precondition failed: Store missing not found");
}

#[tokio::test]
async fn test_generated_keys() {
    let factory = factory();
    let counters: ActionSet<serde_json::Value, MemoryEngine> =
        factory.for_collection("counters", None);

    let first = counters.add(&serde_json::json!({"n": 1}), None).await.unwrap();
    let second = counters.add(&serde_json::json!({"n": 2}), None).await.unwrap();
    assert_eq!(first, Key::from(1));
    assert_eq!(second, Key::from(2));

    // explicit keys work alongside generated ones
    counters
        .update(&serde_json::json!({"n": 10}), Some(Key::from("manual")))
        .await
        .unwrap();
    assert_eq!(counters.count().await.unwrap(), 3);
    assert_eq!(
        counters.get_by_id("manual").await.unwrap(),
        Some(serde_json::json!({"n": 10}))
    );
}

#[tokio::test]
async fn test_cursor_operations() {
    let factory = factory();
    let items = items(&factory);

    for id in ["d", "b", "a", "c"] {
        items.add(&item(id, id), None).await.unwrap();
    }

    let first = items.peek_first(None).await.unwrap().unwrap();
    assert_eq!(first.key, Key::from("a"));
    assert_eq!(first.value, item("a", "a"));

    let range = KeyRange::bound("b", "c", false, false).unwrap();
    let mut seen = Vec::new();
    let visited = items
        .iterate_all(Some(range), |row| seen.push(row.key))
        .await
        .unwrap();
    assert_eq!(visited, 2);
    assert_eq!(seen, vec![Key::from("b"), Key::from("c")]);

    let mut only = None;
    items
        .open_cursor(|row| only = row.map(|r| r.value.id), Some(KeyRange::lower_bound("b", true)))
        .await
        .unwrap();
    assert_eq!(only, Some("c".to_string()));
}

#[tokio::test]
async fn test_same_manager_reused_across_collections() {
    let factory = factory();
    let items = items(&factory);
    let counters: ActionSet<serde_json::Value, MemoryEngine> =
        factory.for_collection("counters", None);

    items.add(&item("a1", "X"), None).await.unwrap();
    counters.add(&serde_json::json!({"n": 1}), None).await.unwrap();

    let handle = factory.manager().current().unwrap();
    assert_eq!(handle.version(), 1);
    assert_eq!(handle.collection_names(), vec!["counters", "items"]);
}
