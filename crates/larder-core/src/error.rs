//! Storage error types

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for persistence-layer operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// A precondition that has to hold before a transaction is opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    /// No connection exists yet
    #[error("Queried before opening connection")]
    NotConnected,

    /// The collection is not part of the open database's schema
    #[error("Store {0} not found")]
    CollectionNotFound(String),

    /// The provider has not finished mounting
    #[error("provider is not mounted")]
    NotMounted,
}

/// Errors surfaced by the connection manager, action sets and provider
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No storage engine in this execution environment
    #[error("storage engine not available: {0}")]
    EngineUnavailable(String),

    /// Open or upgrade request failed
    #[error("connection error: {0}")]
    Connection(EngineError),

    /// Operation attempted without a connection or against a missing collection
    #[error("precondition failed: {0}")]
    PreconditionFailed(#[from] Precondition),

    /// The transaction backing an operation errored or was aborted
    #[error("transaction failed: {0}")]
    TransactionFailed(EngineError),

    /// Invalid or missing database configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The durable config store could not be read or written
    #[error("config store error: {0}")]
    ConfigStore(String),

    /// Record or config (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// The engine failure behind this error, if there is one.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            StoreError::Connection(e) | StoreError::TransactionFailed(e) => Some(e),
            _ => None,
        }
    }

    /// Name of the engine failure (`"ConstraintError"`, `"VersionError"`, ...).
    pub fn engine_error_name(&self) -> Option<&str> {
        self.engine_error().map(|e| e.name.as_str())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
