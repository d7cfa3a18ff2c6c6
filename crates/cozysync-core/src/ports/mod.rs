//! Port definitions (hexagonal architecture)
//!
//! Driven ports implemented by adapters: the metadata store, the two
//! synchronization sides, and the change watchers.

pub mod side;
pub mod store;
pub mod watcher;

pub use side::{DiskUsage, ISide, SideError};
pub use store::{Change, ChangesOptions, IMetadataStore, PutResult, StoreError, StoreLock};
pub use watcher::IWatcher;
