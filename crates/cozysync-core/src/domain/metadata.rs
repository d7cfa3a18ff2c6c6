//! The metadata record
//!
//! A [`Metadata`] value is the single unit the synchronization engine
//! operates on: the canonical description of one file or folder as known
//! by both sides. Watchers build these records from raw observations and
//! upsert them into the store; the engine reads them back off the change
//! feed and drives the lagging side until the two per-side revision
//! counters agree.
//!
//! ## Side revisions
//!
//! `sides.local` and `sides.remote` are independent counters. Whichever
//! side materializes a change bumps its own counter to `rev number + 1`:
//!
//! - `local == remote` - both sides agree, the record is quiescent
//! - `local > remote`  - the remote must still apply a local change
//! - `remote > local`  - the local side must still apply a remote change
//! - both zero         - nothing to do

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Checksum, DocId, RemoteRef, Rev, SyncPath};
use super::platform::Incompatibility;

// ============================================================================
// DocType
// ============================================================================

/// Kind of entry a metadata record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// A regular file, carrying an md5 checksum
    File,
    /// A folder; never carries a checksum
    Folder,
}

impl DocType {
    /// Returns true for file records.
    pub fn is_file(self) -> bool {
        matches!(self, DocType::File)
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocType::File => write!(f, "file"),
            DocType::Folder => write!(f, "folder"),
        }
    }
}

// ============================================================================
// SideName and Sides
// ============================================================================

/// One of the two endpoints being synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideName {
    /// The local filesystem
    Local,
    /// The remote object store
    Remote,
}

impl SideName {
    /// The other endpoint.
    pub fn opposite(self) -> SideName {
        match self {
            SideName::Local => SideName::Remote,
            SideName::Remote => SideName::Local,
        }
    }
}

impl std::fmt::Display for SideName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SideName::Local => write!(f, "local"),
            SideName::Remote => write!(f, "remote"),
        }
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Per-side revision counters; `0` means the side never saw the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sides {
    /// Last revision number the local side materialized
    #[serde(default, skip_serializing_if = "is_zero")]
    pub local: u64,
    /// Last revision number the remote side materialized
    #[serde(default, skip_serializing_if = "is_zero")]
    pub remote: u64,
}

impl Sides {
    /// The counter of the given side.
    pub fn get(&self, side: SideName) -> u64 {
        match side {
            SideName::Local => self.local,
            SideName::Remote => self.remote,
        }
    }

    /// Sets the counter of the given side.
    pub fn set(&mut self, side: SideName, value: u64) {
        match side {
            SideName::Local => self.local = value,
            SideName::Remote => self.remote = value,
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Canonical metadata of one file or folder known to the system.
///
/// Records are created by watcher upserts and mutated only under the
/// store write lock. A record is destroyed once its tombstone has been
/// applied by the opposite side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Path-derived key, unique per document
    pub id: DocId,
    /// Store-assigned revision tag; `None` before the first put
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<Rev>,
    /// Canonical relative POSIX path from the sync root
    pub path: SyncPath,
    /// File or folder
    pub doc_type: DocType,
    /// Tombstone marker
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// md5 digest, required for files, absent for folders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sum: Option<Checksum>,
    /// Content size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Executable bit, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    /// MIME type, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Coarse content class (image, document, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Last modification time, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Local inode number, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ino: Option<u64>,
    /// Remote tags attached to the document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Reference to the remote counterpart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRef>,
    /// Per-side revision counters
    #[serde(default)]
    pub sides: Sides,
    /// Consecutive failures while applying this record
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub errors: u32,
    /// Set on the source record of an in-flight move: id of the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to: Option<DocId>,
    /// Set on the destination record of an in-flight move: value copy of
    /// the prior record (a copy, not a reference, so records stay a forest)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_from: Option<Box<Metadata>>,
    /// This move was induced by an ancestor's move
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub child_move: bool,
    /// Marked for trash, not yet applied
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trashed: bool,
    /// Platform constraints that block local materialization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incompatibilities: Vec<Incompatibility>,
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

impl Metadata {
    /// Creates a minimal record for a path, with everything else unset.
    pub fn new(id: DocId, path: SyncPath, doc_type: DocType) -> Self {
        Self {
            id,
            rev: None,
            path,
            doc_type,
            deleted: false,
            md5sum: None,
            size: None,
            executable: None,
            mime: None,
            class: None,
            updated_at: None,
            ino: None,
            tags: Vec::new(),
            remote: None,
            sides: Sides::default(),
            errors: 0,
            move_to: None,
            move_from: None,
            child_move: false,
            trashed: false,
            incompatibilities: Vec::new(),
        }
    }

    /// The generation number of the current revision, `0` before the
    /// first put.
    pub fn rev_number(&self) -> u64 {
        self.rev.as_ref().map_or(0, Rev::number)
    }

    /// Records that `side` materialized the change carried by this
    /// record: its counter is bumped to one past the revision of `prev`
    /// (the version the store held before this write), and the counters
    /// of `prev` are carried over for the opposite side.
    pub fn mark_side(&mut self, side: SideName, prev: Option<&Metadata>) {
        self.sides = prev.map(|p| p.sides).unwrap_or_default();
        let base = prev.map_or(0, Metadata::rev_number);
        self.sides.set(side, base + 1);
    }

    /// True when both sides have materialized the same revision.
    pub fn up_to_date(&self) -> bool {
        self.sides.local == self.sides.remote
    }

    /// Picks the side responsible for applying this record, along with
    /// the revision number that side last applied. Returns `None` when
    /// the record is quiescent.
    pub fn select_side(&self) -> Option<(SideName, u64)> {
        if self.sides.local > self.sides.remote {
            Some((SideName::Remote, self.sides.remote))
        } else if self.sides.remote > self.sides.local {
            Some((SideName::Local, self.sides.local))
        } else {
            None
        }
    }
}

// ============================================================================
// Equality predicates
// ============================================================================
//
// Used by watchers to suppress no-op events before they reach the store.
// `updated_at` is deliberately excluded: filesystems round modification
// times differently, by up to 3 seconds (FAT), so it cannot distinguish
// a real change from a copy.

/// Folder records describe the same observable state.
pub fn same_folder(a: &Metadata, b: &Metadata) -> bool {
    a.id == b.id
        && a.doc_type == b.doc_type
        && a.remote == b.remote
        && a.tags == b.tags
        && a.trashed == b.trashed
        && a.ino == b.ino
}

/// File records describe the same observable state, content included.
pub fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.id == b.id
        && a.doc_type == b.doc_type
        && a.md5sum == b.md5sum
        && a.remote == b.remote
        && a.tags == b.tags
        && a.size == b.size
        && a.trashed == b.trashed
        && a.ino == b.ino
        && a.executable.unwrap_or(false) == b.executable.unwrap_or(false)
}

/// The two records carry the same binary content.
pub fn same_binary(a: &Metadata, b: &Metadata) -> bool {
    a.md5sum.is_some() && a.md5sum == b.md5sum
}

// ============================================================================
// Unit tests
// ============================================================================
