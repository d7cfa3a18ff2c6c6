//! CozySync Sync - Bidirectional synchronization engine
//!
//! The engine consumes the metadata store's change feed one entry at a
//! time, decides which side must apply each change and which operation
//! applies it, then advances a durable cursor. It provides:
//!
//! - The reconciliation loop ([`engine::SyncEngine`])
//! - The pure change classifier ([`classifier`])
//! - Failure classification, the offline wait loop and the per-document
//!   retry budget ([`errors`])
//! - Trash coalescing for whole subtrees (`trash`)

pub mod classifier;
pub mod engine;
pub mod errors;
mod trash;

pub use engine::{SyncEngine, SyncEvent};
pub use errors::SyncError;
