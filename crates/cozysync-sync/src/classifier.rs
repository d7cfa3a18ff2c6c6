//! Change classification
//!
//! Pure logic mapping a metadata record to the operation the applying
//! side must perform. Keeping the decision as a plain sum type makes the
//! whole table testable without any I/O; the engine owns the only
//! stateful step (looking up the previously applied version) between the
//! two phases:
//!
//! 1. [`initial_action`] resolves every row that needs no historical
//!    lookup (tombstones, moves, fresh records, platform blockers).
//! 2. When it answers [`Plan::CompareWithPrev`], the engine fetches the
//!    version the lagging side last applied and finishes with
//!    [`update_action`].

use cozysync_core::domain::{same_binary, DocType, Metadata, SideName};

// ============================================================================
// SyncAction
// ============================================================================

/// Why a record produces no side operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The record cannot be materialized on this platform
    Incompatible,
    /// The record is the source shadow of a move; the destination record
    /// carries the operation
    MoveSource,
    /// Tombstone for a record this side never materialized
    NeverExisted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Incompatible => write!(f, "platform-incompatible path"),
            SkipReason::MoveSource => write!(f, "move source shadow"),
            SkipReason::NeverExisted => write!(f, "deleted before this side saw it"),
        }
    }
}

/// The operation the applying side must perform for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Materialize a new file
    AddFile,
    /// Materialize a new folder
    AddFolder,
    /// Move a file; the prior state is embedded in `doc.move_from`
    MoveFile,
    /// Move a folder; the prior state is embedded in `doc.move_from`
    MoveFolder,
    /// Replace the binary content of a file
    Overwrite,
    /// Update a file's metadata, content unchanged
    UpdateFileMetadata,
    /// Update a folder's metadata
    UpdateFolder,
    /// Soft-delete into the trash
    Trash,
    /// Hard-delete an already-empty or already-trashed folder
    DeleteFolder,
    /// Bookkeeping only: the side already saw this change
    AssignNewRev,
    /// The record became platform-incompatible through a rename; trash
    /// the still-materialized copy embedded in `doc.move_from`
    TrashFormerCopy,
    /// Nothing to do on the side
    Skip(SkipReason),
}

/// Outcome of the first classification phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// The operation is fully determined
    Do(SyncAction),
    /// The engine must fetch the previously applied version and finish
    /// with [`update_action`]
    CompareWithPrev,
}

// ============================================================================
// Classification
// ============================================================================

/// First classification phase; first match wins.
///
/// `rev` is the revision number the applying side last materialized
/// (`0` when it never saw the record).
pub fn initial_action(doc: &Metadata, side: SideName, rev: u64) -> Plan {
    use Plan::{CompareWithPrev, Do};
    use SyncAction::*;

    // A record that cannot exist on the local filesystem is skipped
    // outright, unless it is the destination of a move whose source was
    // compatible: that copy is still on disk and must be trashed.
    if side == SideName::Local && !doc.incompatibilities.is_empty() && doc.move_to.is_none() {
        match &doc.move_from {
            Some(was) if was.incompatibilities.is_empty() && !was.child_move => {
                return Do(TrashFormerCopy)
            }
            _ => return Do(Skip(SkipReason::Incompatible)),
        }
    }

    if doc.deleted && rev == 0 {
        return Do(Skip(SkipReason::NeverExisted));
    }

    if doc.move_to.is_some() {
        return Do(Skip(SkipReason::MoveSource));
    }

    if let Some(from) = &doc.move_from {
        if !from.incompatibilities.is_empty() {
            // The source never materialized on this side; the move
            // reduces to a plain addition.
            return Do(add_for(doc.doc_type));
        }
        if from.child_move {
            // The ancestor's move already carried this record along.
            return Do(AssignNewRev);
        }
        return Do(match doc.doc_type {
            DocType::File => MoveFile,
            DocType::Folder => MoveFolder,
        });
    }

    if doc.deleted {
        return Do(match doc.doc_type {
            DocType::File => Trash,
            DocType::Folder => DeleteFolder,
        });
    }

    if rev == 0 {
        return Do(add_for(doc.doc_type));
    }

    CompareWithPrev
}

/// Second classification phase, for records the side already carries.
///
/// `prev` is the version the side last applied; `None` means the store
/// no longer has it, in which case the side must overwrite blindly.
pub fn update_action(doc: &Metadata, prev: Option<&Metadata>) -> SyncAction {
    use SyncAction::*;

    let Some(prev) = prev else {
        return match doc.doc_type {
            DocType::File => Overwrite,
            DocType::Folder => AddFolder,
        };
    };

    match doc.doc_type {
        DocType::Folder => UpdateFolder,
        DocType::File if same_binary(doc, prev) => UpdateFileMetadata,
        DocType::File => Overwrite,
    }
}

fn add_for(doc_type: DocType) -> SyncAction {
    match doc_type {
        DocType::File => SyncAction::AddFile,
        DocType::Folder => SyncAction::AddFolder,
    }
}

// ============================================================================
// Unit tests
// ============================================================================
