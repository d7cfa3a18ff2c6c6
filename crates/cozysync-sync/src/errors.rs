//! Engine error types and failure classification
//!
//! Failures while applying a change fall into three tiers:
//!
//! - transient (network loss, racing writers) - handled with the offline
//!   wait loop or by retrying the change off the unadvanced cursor
//! - per-document (a record the side keeps rejecting) - retried up to a
//!   budget, then skipped until a newer revision supersedes it
//! - fatal (full disk, exhausted quota, revoked or insufficient
//!   credentials) - surfaced out of the engine with a stable message

use thiserror::Error;

use cozysync_core::ports::{SideError, StoreError};

/// Errors surfaced by the synchronization engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local disk is full
    #[error("No more disk space")]
    NoMoreDiskSpace,

    /// The remote storage quota is exhausted
    #[error("Cozy is full")]
    CozyFull,

    /// The remote rejected our client registration
    #[error("Client has been revoked")]
    ClientRevoked,

    /// The remote rejected our permission set
    #[error("Client has wrong permissions")]
    WrongPermissions,

    /// The metadata store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything unclassifiable; stops the engine
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Maps a side failure directly onto a fatal engine error, when the
/// failure alone is conclusive. Everything else needs the remote probe.
pub fn fatal_for(err: &SideError) -> Option<SyncError> {
    match err {
        SideError::NoSpaceLeft => Some(SyncError::NoMoreDiskSpace),
        SideError::Http { status: 413 } => Some(SyncError::CozyFull),
        _ => None,
    }
}

/// Maps a failed remote storage probe onto a fatal engine error. A
/// `None` means the remote is unreachable and the engine should enter
/// the offline wait loop instead.
pub fn fatal_for_probe(err: &SideError) -> Option<SyncError> {
    match err.status() {
        Some(400) => Some(SyncError::ClientRevoked),
        Some(403) => Some(SyncError::WrongPermissions),
        _ => None,
    }
}
