//! Side port (driven/secondary port)
//!
//! Uniform capability surface both synchronization endpoints implement:
//! the local filesystem adapter and the remote client expose the same
//! operations, and the engine addresses whichever one lags without ever
//! knowing which concrete side it is calling.
//!
//! ## Design Notes
//!
//! - This is deliberately a capability record rather than a class
//!   hierarchy: the classifier picks the method, a stub implementation
//!   makes the whole decision table testable without I/O.
//! - Operations must be idempotent: after a crash the engine resumes at
//!   its durable cursor and may re-apply the last change.
//! - Implementations stay self-contained: anything that spans both
//!   endpoints (like coalescing a subtree deletion into one trash of
//!   its top folder) is coordinated by the engine, which holds both
//!   sides; a side never needs a reference to its counterpart.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Metadata;

// ============================================================================
// Errors
// ============================================================================

/// Classified failure of a side operation
///
/// The engine's error handler only discriminates three shapes: a full
/// disk, an HTTP status from the remote, and everything else.
#[derive(Debug, Error)]
pub enum SideError {
    /// The disk backing this side is full (ENOSPC-equivalent)
    #[error("No space left on device")]
    NoSpaceLeft,

    /// The remote refused the request with this HTTP status
    #[error("Request failed with status {status}")]
    Http {
        /// The HTTP status code
        status: u16,
    },

    /// Anything else; carried verbatim for logging
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SideError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SideError::Http { status } => Some(*status),
            _ => None,
        }
    }
}

// ============================================================================
// DiskUsage
// ============================================================================

/// Storage occupancy of a side, as reported by its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// Bytes currently used
    pub used: u64,
    /// Total quota in bytes, when the backend enforces one
    pub quota: Option<u64>,
}

// ============================================================================
// ISide trait
// ============================================================================

/// Port trait for a synchronization endpoint
#[async_trait]
pub trait ISide: Send + Sync {
    /// Materializes a new file, content included.
    async fn add_file(&self, doc: &Metadata) -> Result<(), SideError>;

    /// Materializes a new folder.
    async fn add_folder(&self, doc: &Metadata) -> Result<(), SideError>;

    /// Replaces a file's binary content.
    ///
    /// `old` is the previously applied version when known; `None` means
    /// the prior state could not be determined and the side should
    /// overwrite unconditionally.
    async fn overwrite_file(&self, doc: &Metadata, old: Option<&Metadata>)
        -> Result<(), SideError>;

    /// Updates a file's metadata; the binary content is unchanged.
    async fn update_file_metadata(&self, doc: &Metadata, old: &Metadata)
        -> Result<(), SideError>;

    /// Updates a folder's metadata.
    async fn update_folder(&self, doc: &Metadata, old: &Metadata) -> Result<(), SideError>;

    /// Moves or renames a file from its prior location.
    async fn move_file(&self, doc: &Metadata, from: &Metadata) -> Result<(), SideError>;

    /// Moves or renames a folder from its prior location.
    async fn move_folder(&self, doc: &Metadata, from: &Metadata) -> Result<(), SideError>;

    /// Soft-deletes into a recoverable trash.
    async fn trash(&self, doc: &Metadata) -> Result<(), SideError>;

    /// Hard-deletes a folder; only used for folders that are already
    /// empty or already trashed.
    async fn delete_folder(&self, doc: &Metadata) -> Result<(), SideError>;

    /// Bookkeeping only: records that this side already saw the change.
    /// No I/O is performed against the side's backend.
    async fn assign_new_rev(&self, doc: &Metadata) -> Result<(), SideError>;

    /// Probes the side's backend for storage occupancy. Used by the
    /// engine to tell network loss from quota and permission failures.
    async fn disk_usage(&self) -> Result<DiskUsage, SideError>;
}
