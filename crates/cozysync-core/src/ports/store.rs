//! Metadata store port (driven/secondary port)
//!
//! Durable mapping from document id to the latest metadata record, with
//! MVCC-style revisions and a live change feed ordered by a monotonic
//! sequence. The engine's durable cursor lives here too, separate from
//! the store's own sequence.
//!
//! ## Design Notes
//!
//! - `put` is optimistic: it fails with [`StoreError::Conflict`] when the
//!   caller's revision does not match the stored one, mirroring a 409.
//! - The change feed yields at most one entry per id: a rewrite moves the
//!   document to a fresh sequence number, superseding its older entry.
//! - `lock` serializes writers (watchers and engine) without blocking
//!   readers; the returned guard releases on drop.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{DocId, Metadata, Rev};

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The provided revision does not match the stored one
    #[error("Document update conflict: {id}")]
    Conflict {
        /// Id of the contested document
        id: String,
    },

    /// A query against the backing database failed
    #[error("Store query failed: {0}")]
    Query(String),

    /// Serializing or deserializing a record failed
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// Change feed types
// ============================================================================

/// Options for a change-feed read
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    /// Only yield entries with a sequence strictly greater than this
    pub since: u64,
    /// Maximum number of entries to return (`None` for all)
    pub limit: Option<u32>,
    /// Attach the current document body to each entry
    pub include_docs: bool,
    /// Exclude store-internal documents (`_`-prefixed ids)
    pub by_path: bool,
}

impl ChangesOptions {
    /// Entries past `since`, everything else at its default.
    pub fn since(seq: u64) -> Self {
        Self {
            since: seq,
            ..Self::default()
        }
    }
}

/// One entry of the change feed
#[derive(Debug, Clone)]
pub struct Change {
    /// Sequence number this entry was committed at
    pub seq: u64,
    /// Id of the changed document
    pub id: DocId,
    /// Whether the change is a tombstone
    pub deleted: bool,
    /// The document body, when `include_docs` was requested
    pub doc: Option<Metadata>,
}

/// Outcome of a successful `put`
#[derive(Debug, Clone)]
pub struct PutResult {
    /// The newly assigned revision
    pub rev: Rev,
    /// The sequence number the write was committed at
    pub seq: u64,
}

/// Exclusive writer token; dropping it releases the lock.
pub type StoreLock = tokio::sync::OwnedMutexGuard<()>;

// ============================================================================
// IMetadataStore trait
// ============================================================================

/// Port trait for the durable, versioned metadata store
///
/// ## Guarantees expected from implementations
///
/// - Change order matches commit order.
/// - A record appears in the feed each time it is `put`.
/// - After reopening the store, the feed replays from any prior sequence.
#[async_trait]
pub trait IMetadataStore: Send + Sync {
    /// Creates the indexes the engine relies on. Idempotent.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Fetches the latest version of a document.
    async fn get(&self, id: &DocId) -> Result<Option<Metadata>, StoreError>;

    /// Fetches a historical version by its generation number.
    ///
    /// Returns `None` when that generation was never written or its
    /// retention has elapsed; callers treat both as "prev unknown".
    async fn get_previous_rev(
        &self,
        id: &DocId,
        rev_number: u64,
    ) -> Result<Option<Metadata>, StoreError>;

    /// Writes a document, assigning the next revision and sequence.
    ///
    /// Fails with [`StoreError::Conflict`] when `doc.rev` does not match
    /// the stored revision (including a `Some` rev for a missing doc, or
    /// no rev for an existing one).
    async fn put(&self, doc: &Metadata) -> Result<PutResult, StoreError>;

    /// Reads change-feed entries matching `options`, in sequence order.
    async fn changes(&self, options: &ChangesOptions) -> Result<Vec<Change>, StoreError>;

    /// Resolves once a change with a sequence greater than `since` has
    /// been committed. Returns immediately when one already exists.
    async fn wait_for_change(&self, since: u64) -> Result<(), StoreError>;

    /// Acquires the exclusive writer lock.
    async fn lock(&self) -> StoreLock;

    /// Reads the engine's durable cursor (0 when never set).
    async fn get_local_seq(&self) -> Result<u64, StoreError>;

    /// Persists the engine's durable cursor.
    async fn set_local_seq(&self, seq: u64) -> Result<(), StoreError>;

    /// All current documents, excluding store-internal ones.
    async fn get_all(&self) -> Result<Vec<Metadata>, StoreError>;
}
