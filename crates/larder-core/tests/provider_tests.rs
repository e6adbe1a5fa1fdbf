//! End-to-end flows through a mounted Provider

use std::rc::Rc;

use larder_core::schema::{CollectionConfig, DatabaseConfig, IndexConfig};
use larder_core::{
    logging, ActionSet, ConnectionManager, MemoryConfigStore, MemoryEngine, Provider,
    ProviderState, WithGuid, CONFIG_KEY,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Movie {
    imdb_id: String,
    title: String,
}

type Favorite = WithGuid<Movie>;

fn movie(imdb_id: &str, title: &str) -> Movie {
    Movie {
        imdb_id: imdb_id.into(),
        title: title.into(),
    }
}

fn config() -> DatabaseConfig {
    DatabaseConfig::new("rottenApple-db", 1).store(
        CollectionConfig::new("favorite_movies")
            .key_path("guid")
            .index(IndexConfig::new("imdb_id", "imdb_id").unique(true)),
    )
}

async fn mounted(store: MemoryConfigStore) -> Provider<MemoryEngine> {
    logging::try_init_with_filter("warn");
    let manager = Rc::new(ConnectionManager::new(MemoryEngine::new(), store));
    let provider = Provider::new(manager, config());
    provider.mount().await.unwrap();
    provider
}

/// Add the movie if it is not a favorite yet, remove it if it is.
async fn toggle(favorites: &ActionSet<Favorite, MemoryEngine>, m: &Movie) -> bool {
    match favorites
        .get_one_by_index("imdb_id", m.imdb_id.as_str())
        .await
        .unwrap()
    {
        Some(existing) => {
            favorites.delete_by_id(existing.guid).await.unwrap();
            false
        }
        None => {
            favorites.add(&WithGuid::new(m.clone()), None).await.unwrap();
            true
        }
    }
}

#[tokio::test]
async fn test_favorite_toggle_flow() {
    let provider = mounted(MemoryConfigStore::new()).await;
    let favorites = provider.actions::<Favorite>("favorite_movies").unwrap();
    let shawshank = movie("tt0111161", "The Shawshank Redemption");

    assert!(toggle(&favorites, &shawshank).await);
    let stored = favorites
        .get_one_by_index("imdb_id", "tt0111161")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.record, shawshank);
    assert_eq!(stored.guid.len(), 36);

    assert!(!toggle(&favorites, &shawshank).await);
    assert_eq!(favorites.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_same_movie_cannot_be_added_twice() {
    let provider = mounted(MemoryConfigStore::new()).await;
    let favorites = provider.actions::<Favorite>("favorite_movies").unwrap();
    let heat = movie("tt0113277", "Heat");

    favorites.add(&WithGuid::new(heat.clone()), None).await.unwrap();
    let err = favorites
        .add(&WithGuid::new(heat), None)
        .await
        .unwrap_err();
    assert_eq!(err.engine_error_name(), Some("ConstraintError"));
}

#[tokio::test]
async fn test_update_keeps_guid() {
    let provider = mounted(MemoryConfigStore::new()).await;
    let favorites = provider.actions::<Favorite>("favorite_movies").unwrap();

    let mut fav = WithGuid::new(movie("tt0133093", "Matrix"));
    favorites.add(&fav, None).await.unwrap();

    fav.title = "The Matrix".into();
    favorites.update(&fav, None).await.unwrap();

    let all = favorites.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].guid, fav.guid);
    assert_eq!(all[0].title, "The Matrix");
}

#[tokio::test]
async fn test_mount_persists_config() {
    let store = MemoryConfigStore::new();
    let provider = mounted(store.clone()).await;
    assert_eq!(provider.state(), ProviderState::Ready);

    let stored = larder_core::config_store::load_config(&store).unwrap();
    assert_eq!(stored, Some(config()));
    assert!(larder_core::ConfigStore::load(&store, CONFIG_KEY)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_context_render() {
    let provider = mounted(MemoryConfigStore::new()).await;
    let label = provider.render(
        |ctx| format!("{} v{}", ctx.config.name, ctx.config.version),
        || "loading".to_string(),
    );
    assert_eq!(label, "rottenApple-db v1");
}
