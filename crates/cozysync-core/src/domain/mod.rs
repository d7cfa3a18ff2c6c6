//! Domain layer: the metadata record and the pure rules around it.

pub mod errors;
pub mod metadata;
pub mod newtypes;
pub mod platform;

pub use errors::DomainError;
pub use metadata::{
    same_binary, same_file, same_folder, DocType, Metadata, SideName, Sides,
};
pub use newtypes::{Checksum, DocId, RemoteRef, Rev, SyncPath};
pub use platform::{detect_incompatibilities, Incompatibility, IncompatibilityKind, Platform};
