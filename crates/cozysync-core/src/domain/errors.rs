//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including path validation, checksum validation and revision parsing.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path (empty, `.`, or containing a `..` component)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid md5 checksum (not base64, or does not decode to 16 bytes)
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// Invalid revision tag (expected `N-hash`)
    #[error("Invalid revision: {0}")]
    InvalidRev(String),

    /// Invalid document id
    #[error("Invalid document id: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
