//! Platform rules: id derivation and path incompatibilities
//!
//! Filesystems disagree on what counts as "the same name" and on which
//! names are allowed at all. This module concentrates both concerns:
//!
//! - [`Platform::id_for_path`] derives the store key from a path the way
//!   the current filesystem would collapse it (case folding, Unicode
//!   normalization), so that two paths colliding on disk derive the same
//!   id.
//! - [`detect_incompatibilities`] lists the constraints that would block
//!   materializing a path locally (reserved characters or names, length
//!   limits). An empty list means the path is compatible.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use super::metadata::{DocType, Metadata};
use super::newtypes::{DocId, SyncPath};

// ============================================================================
// Platform
// ============================================================================

/// Filesystem family the local side runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Case-sensitive filesystems (ext4, btrfs, ...)
    Unix,
    /// Case-preserving, case-insensitive, Unicode NFD (HFS+, APFS)
    Hfs,
    /// Case-preserving, case-insensitive (NTFS)
    Ntfs,
}

impl Platform {
    /// The platform of the running process.
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Hfs
        } else if cfg!(windows) {
            Platform::Ntfs
        } else {
            Platform::Unix
        }
    }

    /// Derives the store id for a path.
    ///
    /// Idempotent: feeding a derived id back through the same derivation
    /// yields the same id.
    pub fn id_for_path(self, path: &SyncPath) -> DocId {
        match self {
            Platform::Unix => DocId::new(path.as_str()),
            Platform::Hfs => DocId::new(path.as_str().nfd().collect::<String>().to_uppercase()),
            Platform::Ntfs => DocId::new(path.as_str().to_uppercase()),
        }
    }

    fn name_max_bytes(self) -> usize {
        255
    }

    fn path_max_bytes(self) -> usize {
        match self {
            Platform::Unix => 4096,
            Platform::Hfs => 1024,
            Platform::Ntfs => 32766,
        }
    }

    fn reserved_chars(self, name: &str) -> String {
        let reserved: &[char] = match self {
            Platform::Unix => &['\0'],
            Platform::Hfs => &['\0', ':'],
            Platform::Ntfs => &['\0', '<', '>', ':', '"', '\\', '|', '?', '*'],
        };
        let mut found: Vec<char> = name.chars().filter(|c| reserved.contains(c)).collect();
        if self == Platform::Ntfs {
            found.extend(name.chars().filter(char::is_ascii_control));
        }
        found.sort_unstable();
        found.dedup();
        found.into_iter().collect()
    }

    fn reserved_name(self, name: &str) -> Option<String> {
        if self != Platform::Ntfs {
            return None;
        }
        let stem = name.split('.').next().unwrap_or(name).to_uppercase();
        let reserved = matches!(stem.as_str(), "CON" | "PRN" | "AUX" | "NUL")
            || ((stem.starts_with("COM") || stem.starts_with("LPT"))
                && stem.len() == 4
                && stem[3..].chars().all(|c| c.is_ascii_digit() && c != '0'));
        reserved.then_some(stem)
    }

    fn forbidden_last_char(self, name: &str) -> Option<char> {
        if self != Platform::Ntfs {
            return None;
        }
        name.chars().last().filter(|c| *c == ' ' || *c == '.')
    }
}

// ============================================================================
// Incompatibilities
// ============================================================================

/// Why a path segment or the whole path cannot exist on the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncompatibilityKind {
    /// The segment contains characters the platform forbids
    ReservedChars {
        /// The offending characters, deduplicated
        chars: String,
    },
    /// The segment is a name the platform reserves (CON, NUL, ...)
    ReservedName {
        /// The reserved stem, uppercased
        name: String,
    },
    /// The segment ends with a character the platform strips or rejects
    ForbiddenLastChar {
        /// The offending trailing character
        last: char,
    },
    /// The segment exceeds the per-name byte limit
    NameMaxBytes {
        /// The platform limit
        max: usize,
        /// The actual length in bytes
        actual: usize,
    },
    /// The absolute path exceeds the total path byte limit
    PathMaxBytes {
        /// The platform limit
        max: usize,
        /// The actual length in bytes
        actual: usize,
    },
}

/// One constraint blocking local materialization of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incompatibility {
    /// The nature of the constraint
    #[serde(flatten)]
    pub kind: IncompatibilityKind,
    /// The path (or the offending prefix of it)
    pub path: String,
    /// Whether the blocked entry is a file or a folder
    pub doc_type: DocType,
}

/// Lists the platform constraints that block materializing `doc` under
/// `sync_root`. An empty list means the path is compatible.
pub fn detect_incompatibilities(
    doc: &Metadata,
    sync_root: &str,
    platform: Platform,
) -> Vec<Incompatibility> {
    let mut issues = Vec::new();
    let mut prefix = String::new();

    let segments: Vec<&str> = doc.path.segments().collect();
    for (i, segment) in segments.iter().enumerate() {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);

        // Intermediate segments are folders by construction.
        let doc_type = if i + 1 == segments.len() {
            doc.doc_type
        } else {
            DocType::Folder
        };

        let chars = platform.reserved_chars(segment);
        if !chars.is_empty() {
            issues.push(Incompatibility {
                kind: IncompatibilityKind::ReservedChars { chars },
                path: prefix.clone(),
                doc_type,
            });
        }
        if let Some(name) = platform.reserved_name(segment) {
            issues.push(Incompatibility {
                kind: IncompatibilityKind::ReservedName { name },
                path: prefix.clone(),
                doc_type,
            });
        }
        if let Some(last) = platform.forbidden_last_char(segment) {
            issues.push(Incompatibility {
                kind: IncompatibilityKind::ForbiddenLastChar { last },
                path: prefix.clone(),
                doc_type,
            });
        }
        if segment.len() > platform.name_max_bytes() {
            issues.push(Incompatibility {
                kind: IncompatibilityKind::NameMaxBytes {
                    max: platform.name_max_bytes(),
                    actual: segment.len(),
                },
                path: prefix.clone(),
                doc_type,
            });
        }
    }

    let total = sync_root.len() + 1 + doc.path.as_str().len();
    if total > platform.path_max_bytes() {
        issues.push(Incompatibility {
            kind: IncompatibilityKind::PathMaxBytes {
                max: platform.path_max_bytes(),
                actual: total,
            },
            path: doc.path.as_str().to_string(),
            doc_type: doc.doc_type,
        });
    }

    issues
}

// ============================================================================
// Unit tests
// ============================================================================
