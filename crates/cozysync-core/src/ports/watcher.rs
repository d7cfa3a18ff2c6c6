//! Watcher port (driven/secondary port)
//!
//! A watcher observes one side (filesystem events locally, change-feed
//! polling remotely), reduces every observation to a metadata record and
//! upserts it into the store. The engine never sees raw events; it only
//! manages the watcher lifecycle and reacts to a watcher dying.

use async_trait::async_trait;

/// Port trait for a change watcher
#[async_trait]
pub trait IWatcher: Send + Sync {
    /// Starts producing metadata upserts. Returns once the watcher is
    /// running (initial scan may continue in the background).
    async fn start(&self) -> anyhow::Result<()>;

    /// Resolves only when the watcher fails. A healthy watcher keeps
    /// this future pending for its whole lifetime; the engine treats
    /// completion as fatal and shuts down.
    async fn running(&self) -> anyhow::Result<()>;

    /// Stops the watcher and waits for its tasks to finish.
    async fn stop(&self) -> anyhow::Result<()>;
}
