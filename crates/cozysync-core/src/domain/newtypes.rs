//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the values the engine passes around.
//! Each newtype ensures validity at construction time, so the rest of
//! the code can take them at face value.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// SyncPath
// ============================================================================

/// A relative POSIX path from the sync root, in canonical form.
///
/// Construction normalizes the input: platform separators are folded to
/// `/`, leading separators are stripped, empty and `.` components are
/// dropped. Inputs that are empty after normalization or that contain a
/// `..` component are rejected, so a `SyncPath` can never escape the
/// sync root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncPath(String);

impl SyncPath {
    /// Creates a `SyncPath`, normalizing the input as a side effect.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = raw.as_ref();
        let unified = raw.replace('\\', "/");

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(DomainError::InvalidPath(raw.to_string())),
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(DomainError::InvalidPath(raw.to_string()));
        }

        Ok(Self(segments.join("/")))
    }

    /// The canonical path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path component (file or folder name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The parent path, or `None` for a root-level entry.
    pub fn parent(&self) -> Option<SyncPath> {
        self.0.rsplit_once('/').map(|(p, _)| SyncPath(p.to_string()))
    }

    /// Iterates over the path components.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SyncPath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SyncPath> for String {
    fn from(p: SyncPath) -> Self {
        p.0
    }
}

impl FromStr for SyncPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// DocId
// ============================================================================

/// Path-derived key of a metadata record, unique per document.
///
/// The id is produced by [`Platform::id_for_path`](super::platform::Platform)
/// and is the canonical "same entity" test on the local side: two paths
/// that collide on the current filesystem derive the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Wraps an already-derived id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the parent entry, or `None` for a root-level id.
    ///
    /// Ids keep the `/` separators of the path they derive from, so the
    /// parent id is everything before the last separator.
    pub fn parent(&self) -> Option<DocId> {
        self.0.rsplit_once('/').map(|(p, _)| DocId(p.to_string()))
    }

    /// Returns true for ids reserved for store-internal bookkeeping.
    pub fn is_internal(&self) -> bool {
        self.0.starts_with('_')
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Rev
// ============================================================================

/// A store-assigned revision tag of the form `N-hash`.
///
/// `N` is a monotonically increasing integer within an id; the hash half
/// only disambiguates concurrent branches and is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rev(String);

impl Rev {
    /// Parses and validates an `N-hash` revision tag.
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        match raw.split_once('-') {
            Some((n, hash)) if !hash.is_empty() && n.parse::<u64>().is_ok() => Ok(Self(raw)),
            _ => Err(DomainError::InvalidRev(raw)),
        }
    }

    /// Builds a revision tag from its generation number and hash half.
    pub fn from_parts(number: u64, hash: &str) -> Self {
        Self(format!("{number}-{hash}"))
    }

    /// The generation number `N` of this revision.
    pub fn number(&self) -> u64 {
        self.0
            .split_once('-')
            .and_then(|(n, _)| n.parse().ok())
            .unwrap_or(0)
    }

    /// The revision tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Rev {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Rev {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Rev> for String {
    fn from(r: Rev) -> Self {
        r.0
    }
}

// ============================================================================
// Checksum
// ============================================================================

/// A base64-encoded md5 digest of a file's content.
///
/// Valid when the string decodes to exactly 16 bytes and re-encodes to
/// the same string, which rules out both truncated digests and
/// non-canonical encodings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Validates and wraps a base64 md5 digest.
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let decoded = BASE64
            .decode(&raw)
            .map_err(|_| DomainError::InvalidChecksum(raw.clone()))?;
        if decoded.len() != 16 || BASE64.encode(&decoded) != raw {
            return Err(DomainError::InvalidChecksum(raw));
        }
        Ok(Self(raw))
    }

    /// The digest as its base64 string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Checksum {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.0
    }
}

// ============================================================================
// RemoteRef
// ============================================================================

/// Reference to the remote counterpart of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Identifier of the document on the remote store
    pub id: String,
    /// Last known revision of the remote document
    pub rev: String,
}

impl RemoteRef {
    /// Creates a remote reference.
    pub fn new(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: rev.into(),
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
