//! Connection lifecycle: open, upgrade, cache and close
//!
//! The manager owns the single open handle for the process. Callers never keep
//! a handle around; they ask the manager for one per operation and it hands
//! back the cached handle while the effective `(name, version)` stays the same.
//!
//! # Config precedence
//!
//! A config passed to [`ConnectionManager::open`] or
//! [`ConnectionManager::connect`] always wins and is persisted to the
//! [`ConfigStore`]. The stored copy is only read when no config is passed.
//!
//! # Two-phase open
//!
//! When opening creates or upgrades the schema, the handle used for the
//! upgrade is closed and [`OpenOutcome::SchemaUpgraded`] is returned instead of
//! a handle; the caller reopens to get a live connection. [`connect`] does
//! that reopen for you.
//!
//! [`connect`]: ConnectionManager::connect

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config_store::{load_config, save_config, ConfigStore};
use crate::engine::{Engine, EngineError, Handle, SchemaEditor, UpgradeFn, VersionChange};
use crate::error::{Result, StoreError};
use crate::logging::prefix;
use crate::schema::{apply_upgrade, DatabaseConfig, UpgradeReport};

/// Result of a single open request.
#[derive(Debug)]
pub enum OpenOutcome<H> {
    /// The database was already at the requested version.
    Opened(H),
    /// The schema was just created or upgraded; reopen to use it.
    SchemaUpgraded {
        from: u32,
        to: u32,
        report: UpgradeReport,
    },
}

impl<H> OpenOutcome<H> {
    pub fn into_handle(self) -> Option<H> {
        match self {
            OpenOutcome::Opened(handle) => Some(handle),
            OpenOutcome::SchemaUpgraded { .. } => None,
        }
    }
}

struct Cached<H> {
    name: String,
    version: u32,
    handle: H,
}

/// Opens, upgrades and caches the connection to one database.
pub struct ConnectionManager<E: Engine> {
    engine: E,
    config_store: Rc<dyn ConfigStore>,
    cached: RefCell<Option<Cached<E::Handle>>>,
    // one open request in flight at a time
    open_lock: Mutex<()>,
}

impl<E: Engine> ConnectionManager<E> {
    pub fn new(engine: E, config_store: impl ConfigStore + 'static) -> Self {
        Self {
            engine,
            config_store: Rc::new(config_store),
            cached: RefCell::new(None),
            open_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config_store(&self) -> &dyn ConfigStore {
        self.config_store.as_ref()
    }

    /// The config an open would use: the supplied one (persisted), else the stored one.
    pub fn effective_config(&self, config: Option<&DatabaseConfig>) -> Result<DatabaseConfig> {
        if let Some(config) = config {
            config.validate()?;
            save_config(self.config_store.as_ref(), config)?;
            return Ok(config.clone());
        }
        match load_config(self.config_store.as_ref())? {
            Some(stored) => {
                debug!(db = %stored.name, version = stored.version, "{} using stored config", prefix::DB);
                Ok(stored)
            }
            None => Err(StoreError::Config(
                "no database configuration supplied and none stored".into(),
            )),
        }
    }

    /// Issue one open request.
    ///
    /// Returns [`OpenOutcome::SchemaUpgraded`] (and closes the upgrade
    /// connection) when the request created or upgraded the schema.
    pub async fn open(&self, config: Option<&DatabaseConfig>) -> Result<OpenOutcome<E::Handle>> {
        self.ensure_available()?;
        let config = self.effective_config(config)?;
        let _guard = self.open_lock.lock().await;
        self.release_if_other(&config);
        self.open_once(&config).await
    }

    /// Get a live connection, reopening once after a schema upgrade and
    /// reusing the cached connection when possible.
    pub async fn connect(&self, config: Option<&DatabaseConfig>) -> Result<E::Handle> {
        self.ensure_available()?;
        let config = self.effective_config(config)?;
        let _guard = self.open_lock.lock().await;

        if let Some(handle) = self.cached_for(&config) {
            return Ok(handle);
        }
        self.release_if_other(&config);

        let handle = match self.open_once(&config).await? {
            OpenOutcome::Opened(handle) => handle,
            OpenOutcome::SchemaUpgraded { .. } => match self.open_once(&config).await? {
                OpenOutcome::Opened(handle) => handle,
                OpenOutcome::SchemaUpgraded { .. } => {
                    return Err(StoreError::Connection(EngineError::invalid_state(format!(
                        "schema of '{}' changed again while reopening",
                        config.name
                    ))))
                }
            },
        };

        *self.cached.borrow_mut() = Some(Cached {
            name: config.name.clone(),
            version: config.version,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// The cached connection, if it is still open.
    pub fn current(&self) -> Option<E::Handle> {
        self.cached
            .borrow()
            .as_ref()
            .filter(|c| !c.handle.is_closed())
            .map(|c| c.handle.clone())
    }

    /// Close and forget the cached connection.
    pub fn close(&self) {
        if let Some(cached) = self.cached.borrow_mut().take() {
            cached.handle.close();
            info!(db = %cached.name, "{} connection closed", prefix::CLOSE);
        }
    }

    /// Delete a database, closing the cached connection to it first.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.ensure_available()?;
        let _guard = self.open_lock.lock().await;
        let is_cached = self
            .cached
            .borrow()
            .as_ref()
            .is_some_and(|c| c.name == name);
        if is_cached {
            self.close();
        }
        self.engine.delete_database(name).await.map_err(|e| {
            warn!(db = %name, error = %e, "{} delete failed", prefix::DB);
            StoreError::Connection(e)
        })?;
        info!(db = %name, "{} database deleted", prefix::DB);
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.engine.is_available() {
            Ok(())
        } else {
            Err(StoreError::EngineUnavailable(
                "no object-store engine in this environment".into(),
            ))
        }
    }

    fn cached_for(&self, config: &DatabaseConfig) -> Option<E::Handle> {
        self.cached
            .borrow()
            .as_ref()
            .filter(|c| c.name == config.name && c.version == config.version)
            .filter(|c| !c.handle.is_closed())
            .map(|c| c.handle.clone())
    }

    /// A cached connection to another database or version would block an upgrade.
    fn release_if_other(&self, config: &DatabaseConfig) {
        let stale = self
            .cached
            .borrow()
            .as_ref()
            .is_some_and(|c| c.name != config.name || c.version != config.version);
        if stale {
            self.close();
        }
    }

    async fn open_once(&self, config: &DatabaseConfig) -> Result<OpenOutcome<E::Handle>> {
        let upgraded: Rc<RefCell<Option<(VersionChange, UpgradeReport)>>> =
            Rc::new(RefCell::new(None));
        let slot = upgraded.clone();
        let schema = config.clone();
        let upgrade: UpgradeFn = Box::new(
            move |editor: &mut dyn SchemaEditor, change: VersionChange| {
                let report = apply_upgrade(editor, &schema)?;
                *slot.borrow_mut() = Some((change, report));
                Ok(())
            },
        );

        debug!(db = %config.name, version = config.version, "{} open requested", prefix::DB);
        let handle = self
            .engine
            .open(&config.name, config.version, upgrade)
            .await
            .map_err(|e| {
                warn!(db = %config.name, version = config.version, error = %e, "{} open failed", prefix::DB);
                StoreError::Connection(e)
            })?;

        let upgrade = upgraded.borrow_mut().take();
        if let Some((change, report)) = upgrade {
            handle.close();
            info!(
                db = %config.name,
                from = change.old,
                to = change.new,
                collections = ?report.created_collections,
                indices = report.created_indices.len(),
                "{} schema upgraded, reopen required",
                prefix::DB
            );
            return Ok(OpenOutcome::SchemaUpgraded {
                from: change.old,
                to: change.new,
                report,
            });
        }

        info!(db = %config.name, version = config.version, "{} connection open", prefix::OPEN);
        Ok(OpenOutcome::Opened(handle))
    }
}
