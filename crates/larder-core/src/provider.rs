//! Mount-time initialization and the shared storage context
//!
//! A [`Provider`] opens the database once when it is mounted and then hands
//! out a [`Context`] (the active config plus an [`ActionSetFactory`]) to
//! anything that asks for it. Until the open completes it reports
//! [`ProviderState::Uninitialized`] and [`Provider::render`] falls back to the
//! placeholder.

use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::actions::{ActionSet, ActionSetFactory};
use crate::connection::ConnectionManager;
use crate::engine::Engine;
use crate::error::{Precondition, Result};
use crate::logging::prefix;
use crate::schema::DatabaseConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Ready,
}

/// What a mounted provider exposes to its consumers.
pub struct Context<E: Engine> {
    pub config: DatabaseConfig,
    pub factory: ActionSetFactory<E>,
}

impl<E: Engine> Clone for Context<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<E: Engine> Context<E> {
    /// Action set for `collection`, bound to this context's config.
    pub fn actions<T>(&self, collection: &str) -> ActionSet<T, E>
    where
        T: Serialize + DeserializeOwned,
    {
        self.factory.for_collection(collection, Some(&self.config))
    }
}

pub struct Provider<E: Engine> {
    manager: Rc<ConnectionManager<E>>,
    config: DatabaseConfig,
    context: RefCell<Option<Context<E>>>,
}

impl<E: Engine> Provider<E> {
    pub fn new(manager: Rc<ConnectionManager<E>>, config: DatabaseConfig) -> Self {
        Self {
            manager,
            config,
            context: RefCell::new(None),
        }
    }

    /// Open the database (creating or upgrading the schema if needed) and
    /// publish the context.
    ///
    /// A failed mount leaves the provider uninitialized; calling `mount`
    /// again retries. Mounting an already mounted provider is a no-op.
    pub async fn mount(&self) -> Result<()> {
        if self.state() == ProviderState::Ready {
            return Ok(());
        }

        if let Err(e) = self.manager.connect(Some(&self.config)).await {
            warn!(db = %self.config.name, error = %e, "{} mount failed", prefix::DB);
            return Err(e);
        }

        *self.context.borrow_mut() = Some(Context {
            config: self.config.clone(),
            factory: ActionSetFactory::new(self.manager.clone(), Some(self.config.clone())),
        });
        info!(db = %self.config.name, version = self.config.version, "{} provider ready", prefix::OPEN);
        Ok(())
    }

    pub fn state(&self) -> ProviderState {
        if self.context.borrow().is_some() {
            ProviderState::Ready
        } else {
            ProviderState::Uninitialized
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn manager(&self) -> &Rc<ConnectionManager<E>> {
        &self.manager
    }

    /// The published context, once mounted.
    pub fn context(&self) -> Option<Context<E>> {
        self.context.borrow().clone()
    }

    /// Action set for `collection`; fails until the provider is mounted.
    pub fn actions<T>(&self, collection: &str) -> Result<ActionSet<T, E>>
    where
        T: Serialize + DeserializeOwned,
    {
        let context = self.context.borrow();
        let context = context.as_ref().ok_or(Precondition::NotMounted)?;
        Ok(context.actions(collection))
    }

    /// `ready` with the context once mounted, `placeholder` before that.
    pub fn render<R>(
        &self,
        ready: impl FnOnce(&Context<E>) -> R,
        placeholder: impl FnOnce() -> R,
    ) -> R {
        match self.context.borrow().as_ref() {
            Some(context) => ready(context),
            None => placeholder(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;
    use crate::engine::MemoryEngine;
    use crate::error::StoreError;
    use crate::schema::CollectionConfig;
    use serde_json::{json, Value};

    fn provider(engine: MemoryEngine) -> Provider<MemoryEngine> {
        let config =
            DatabaseConfig::new("app-db", 1).store(CollectionConfig::new("items").key_path("id"));
        let manager = Rc::new(ConnectionManager::new(engine, MemoryConfigStore::new()));
        Provider::new(manager, config)
    }

    #[tokio::test]
    async fn test_renders_placeholder_until_mounted() {
        let provider = provider(MemoryEngine::new());
        assert_eq!(provider.state(), ProviderState::Uninitialized);
        assert_eq!(provider.render(|_| "app", || "loading"), "loading");

        provider.mount().await.unwrap();
        assert_eq!(provider.state(), ProviderState::Ready);
        assert_eq!(provider.render(|ctx| ctx.config.name.clone(), String::new), "app-db");
    }

    #[tokio::test]
    async fn test_actions_before_mount() {
        let provider = provider(MemoryEngine::new());
        let err = provider.actions::<Value>("items").err().unwrap();
        assert!(matches!(
            err,
            StoreError::PreconditionFailed(Precondition::NotMounted)
        ));
    }

    #[tokio::test]
    async fn test_context_actions_share_connection() {
        let provider = provider(MemoryEngine::new());
        provider.mount().await.unwrap();

        let items = provider.actions::<Value>("items").unwrap();
        items.add(&json!({"id": "a1", "title": "X"}), None).await.unwrap();

        let ctx = provider.context().unwrap();
        let again = ctx.actions::<Value>("items");
        assert_eq!(again.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_engine_stays_uninitialized() {
        let provider = provider(MemoryEngine::unavailable());
        assert!(matches!(
            provider.mount().await,
            Err(StoreError::EngineUnavailable(_))
        ));
        assert_eq!(provider.state(), ProviderState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_mount_can_retry() {
        let engine = MemoryEngine::new();
        let other = ConnectionManager::new(engine.clone(), MemoryConfigStore::new());
        let newer =
            DatabaseConfig::new("app-db", 2).store(CollectionConfig::new("items").key_path("id"));
        other.connect(Some(&newer)).await.unwrap();

        let provider = provider(engine);
        let err = provider.mount().await.unwrap_err();
        assert_eq!(err.engine_error_name(), Some("VersionError"));
        assert_eq!(provider.state(), ProviderState::Uninitialized);

        other.delete_database("app-db").await.unwrap();
        provider.mount().await.unwrap();
        assert_eq!(provider.state(), ProviderState::Ready);
    }

    #[tokio::test]
    async fn test_mount_twice_is_noop() {
        let provider = provider(MemoryEngine::new());
        provider.mount().await.unwrap();
        provider.mount().await.unwrap();
        assert_eq!(provider.state(), ProviderState::Ready);
    }
}
