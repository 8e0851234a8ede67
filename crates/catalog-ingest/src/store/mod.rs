//! Document store abstraction
//!
//! The pipeline only talks to a store through [`DocumentStore`]. Two
//! backends ship with the crate:
//!
//! - [`InMemoryStore`]: process-local, atomic write groups, fault injection
//! - [`FirestoreStore`]: Firestore REST API (or its emulator)

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{IngestConfig, StoreKind};
use crate::error::{IngestError, StoreError};
use crate::models::{Document, StoredDocument};

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::InMemoryStore;

/// Result type for store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a direct upsert treats fields missing from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Fields absent from the payload are left untouched
    Merge,
    /// The document is replaced by the payload
    Overwrite,
}

/// Kind of a single write inside a write group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Create the document; fails if it already exists
    Create,
    /// Upsert with partial merge
    Merge,
}

/// One write of an atomic write group
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub document_id: String,
    pub fields: Document,
    pub kind: WriteKind,
}

/// Transactional key-value document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &str;

    /// Write a single document
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        fields: &Document,
        policy: MergePolicy,
    ) -> StoreResult<()>;

    /// Documents whose `field` equals `value`, at most `limit` of them.
    ///
    /// No match is an empty vector, never an error.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> StoreResult<Vec<StoredDocument>>;

    /// Document stored under `id`, or `None` when there is none
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<StoredDocument>>;

    /// Number of documents in a collection
    async fn count(&self, collection: &str) -> StoreResult<u64>;

    /// Apply all writes or none
    async fn commit_group(&self, collection: &str, writes: &[WriteOp]) -> StoreResult<()>;

    /// First `limit` documents of a collection
    async fn list(&self, collection: &str, limit: usize) -> StoreResult<Vec<StoredDocument>>;

    /// Cheap read proving the store answers at all
    async fn ping(&self, collection: &str) -> StoreResult<()> {
        self.list(collection, 1).await.map(|_| ())
    }
}

/// Run a store call, turning an elapsed bound into [`StoreError::Timeout`]
pub async fn bounded<T, F>(timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// Build the configured store backend
///
/// Fails fast with [`IngestError::Initialization`] when the backend cannot
/// be constructed. Reachability is checked later, at the start of a run.
pub fn connect(config: &IngestConfig) -> Result<Arc<dyn DocumentStore>, IngestError> {
    match config.store {
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store; nothing will be persisted");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreKind::Firestore => {
            let store = FirestoreStore::new(&config.firestore, config.store_timeout())?;
            Ok(Arc::new(store))
        }
    }
}
