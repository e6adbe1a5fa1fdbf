//! Scoped transactions over a single collection
//!
//! [`validate_target`] is the precondition every operation checks before it
//! opens a transaction. It short-circuits: an operation that fails it never
//! reaches the engine.

use tracing::{debug, warn};

use crate::engine::{EngineError, EngineTransaction, Handle, TxMode, TxOutcome};
use crate::error::{Precondition, Result, StoreError};
use crate::logging::prefix;

/// Check that a connection exists and holds `collection`.
pub fn validate_target<H: Handle>(handle: Option<&H>, collection: &str) -> Result<()> {
    let handle = handle.ok_or(Precondition::NotConnected)?;
    if handle.is_closed() {
        return Err(Precondition::NotConnected.into());
    }
    if !handle.has_collection(collection) {
        return Err(Precondition::CollectionNotFound(collection.to_string()).into());
    }
    Ok(())
}

/// Optional observers for how a transaction ends. Each fires at most once,
/// from [`Transaction::finish`].
#[derive(Default)]
pub struct TransactionHooks {
    on_complete: Option<Box<dyn FnOnce()>>,
    on_error: Option<Box<dyn FnOnce(&EngineError)>>,
    on_abort: Option<Box<dyn FnOnce()>>,
}

impl TransactionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_complete(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&EngineError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_abort = Some(Box::new(f));
        self
    }
}

/// A transaction scoped to one collection.
pub struct Transaction<T: EngineTransaction> {
    tx: T,
    collection: String,
    hooks: TransactionHooks,
}

impl<T: EngineTransaction> Transaction<T> {
    /// Validate the target and open a transaction on it.
    pub fn begin<H>(handle: &H, mode: TxMode, collection: &str) -> Result<Self>
    where
        H: Handle<Transaction = T>,
    {
        validate_target(Some(handle), collection)?;
        let tx = handle
            .transaction(collection, mode)
            .map_err(StoreError::TransactionFailed)?;
        debug!(collection, %mode, "{} transaction started", prefix::DB);
        Ok(Self {
            tx,
            collection: collection.to_string(),
            hooks: TransactionHooks::default(),
        })
    }

    pub fn with_hooks(mut self, hooks: TransactionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Accessor for issuing requests against the collection.
    pub fn store(&self) -> &T {
        &self.tx
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn mode(&self) -> TxMode {
        self.tx.mode()
    }

    /// Map a request's result, logging failures against this transaction.
    pub fn request<R>(&self, op: &str, result: std::result::Result<R, EngineError>) -> Result<R> {
        result.map_err(|e| {
            warn!(collection = %self.collection, op, error = %e, "{} request failed", prefix::DB);
            StoreError::TransactionFailed(e)
        })
    }

    /// Commit explicitly instead of waiting for the engine to auto-commit.
    pub fn commit(&self) -> Result<()> {
        self.tx.commit().map_err(StoreError::TransactionFailed)
    }

    pub fn abort(&self) -> Result<()> {
        self.tx.abort().map_err(StoreError::TransactionFailed)
    }

    /// Wait for the transaction to end and report how it ended.
    pub async fn finish(self) -> Result<()> {
        let Self {
            tx,
            collection,
            hooks,
        } = self;
        match tx.finish().await {
            TxOutcome::Completed => {
                if let Some(f) = hooks.on_complete {
                    f();
                }
                Ok(())
            }
            TxOutcome::Failed(err) => {
                warn!(collection = %collection, error = %err, "{} transaction failed", prefix::DB);
                if let Some(f) = hooks.on_error {
                    f(&err);
                }
                Err(StoreError::TransactionFailed(err))
            }
            TxOutcome::Aborted => {
                warn!(collection = %collection, "{} transaction aborted", prefix::DB);
                if let Some(f) = hooks.on_abort {
                    f();
                }
                Err(StoreError::TransactionFailed(EngineError::abort(format!(
                    "transaction on '{}' was aborted",
                    collection
                ))))
            }
        }
    }
}

/// Open a transaction on `collection` with `hooks` attached.
pub fn with_transaction<H: Handle>(
    handle: &H,
    mode: TxMode,
    collection: &str,
    hooks: TransactionHooks,
) -> Result<Transaction<H::Transaction>> {
    Ok(Transaction::begin(handle, mode, collection)?.with_hooks(hooks))
}
