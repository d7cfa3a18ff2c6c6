//! CozySync Store - Durable metadata persistence
//!
//! SQLite-based implementation of the `IMetadataStore` port from
//! `cozysync-core`: the latest record per document id, the revision
//! history behind it, a change feed ordered by a monotonic sequence,
//! and the engine's durable cursor. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! The whole adapter is [`SqliteMetadataStore`]; it owns its connection
//! handling (WAL mode, embedded idempotent schema, a single-connection
//! in-memory flavor for tests) as well as the port implementation.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use cozysync_core::ports::StoreError;
//! use cozysync_store::SqliteMetadataStore;
//!
//! # async fn example() -> Result<(), StoreError> {
//! let store =
//!     SqliteMetadataStore::open(Path::new("/home/user/.local/share/cozysync/metadata.db"))
//!         .await?;
//! // Use store as IMetadataStore...
//! # Ok(())
//! # }
//! ```

pub mod store;

pub use store::SqliteMetadataStore;
