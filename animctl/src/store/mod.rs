//! Identity store abstraction.
//!
//! The identity store is a document database holding one document per [`Identity`] (keyed by
//! identity id), one singleton configuration document, and the read-only transaction list. The
//! session cache only talks to it through the [`DocumentStore`] trait so that tests (and the
//! local, non-networked variant) can substitute their own implementation.
//!
//! Two implementations ship with the crate:
//!
//! - [`memory::InMemoryStore`]: process-local documents, with an availability switch to simulate
//!   an unreachable store
//! - [`file::FileStore`]: the local persisted fallback, a single JSON blob on disk rewritten after
//!   every mutation
//!
//! Writes are last-writer-wins. There are no transactions and no concurrency tokens.

use async_trait::async_trait;

use crate::models::{Configuration, ConfigurationPatch, Identity, IdentityUpdate, Transaction};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached
    #[error("identity store unavailable: {0}")]
    Unavailable(String),

    /// A partial update targeted a document that does not exist
    #[error("document {0} not found")]
    NotFound(String),

    #[error("failed to (de)serialize document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document store operations used by the session cache.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one identity document
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>>;

    /// Fetch every identity document
    async fn list_identities(&self) -> Result<Vec<Identity>>;

    /// Whether any identity has ever been recorded
    async fn has_any_identity(&self) -> Result<bool>;

    /// Overwrite (or create) an identity document
    async fn put_identity(&self, identity: &Identity) -> Result<()>;

    /// Apply a partial field update to an existing identity document
    async fn update_identity(&self, id: &str, update: &IdentityUpdate) -> Result<()>;

    /// Fetch the configuration document as stored, which may be partial or missing
    async fn get_configuration(&self) -> Result<Option<ConfigurationPatch>>;

    /// Overwrite the configuration document
    async fn put_configuration(&self, configuration: &Configuration) -> Result<()>;

    /// Fetch every ledger transaction
    async fn list_transactions(&self) -> Result<Vec<Transaction>>;
}
