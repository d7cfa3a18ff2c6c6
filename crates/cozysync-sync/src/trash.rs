//! Trash coalescing for whole subtrees
//!
//! When a subtree is deleted locally, every record below it flows
//! through the feed marked as trashed. Trashing each entry on the
//! remote individually would scatter the subtree across the trash;
//! instead the engine climbs to the top-most trashed ancestor and
//! trashes only that one, preserving the structure for restoration.

use tracing::info;

use cozysync_core::domain::{DocId, Metadata};
use cozysync_core::ports::SideError;

use crate::engine::SyncEngine;

impl SyncEngine {
    /// Trashes `doc` on the remote, or its top-most trashed ancestor.
    ///
    /// Returns `true` when a trash was applied for this record and the
    /// caller may advance the cursor. Returns `false` when the work was
    /// redirected to an ancestor: the cursor must stay put so a later
    /// feed entry re-drives this record once the ancestor's trashing
    /// has propagated.
    pub(crate) async fn trash_with_parent(&self, doc: &Metadata) -> Result<bool, SideError> {
        let Some(parent_id) = doc.id.parent() else {
            // Root-level entry: nothing to coalesce with.
            self.remote.trash(doc).await?;
            return Ok(true);
        };

        let mut parent = self.load(&parent_id).await?;
        if !parent.as_ref().is_some_and(|p| p.trashed) {
            // The parent's own deletion may still be racing through the
            // feed; give it a moment and look again.
            tokio::time::sleep(self.options.trashing_delay).await;
            parent = self.load(&parent_id).await?;
        }

        match parent {
            Some(parent) if parent.trashed && parent.sides.remote < parent.rev_number() => {
                info!(path = %parent.path, "trashing the parent with its content");
                Box::pin(self.trash_with_parent(&parent)).await?;
                // Let the remote feed absorb the parent's trashing
                // before this record is driven again.
                tokio::time::sleep(self.options.heartbeat).await;
                Ok(false)
            }
            _ => {
                self.remote.trash(doc).await?;
                Ok(true)
            }
        }
    }

    async fn load(&self, id: &DocId) -> Result<Option<Metadata>, SideError> {
        self.store
            .get(id)
            .await
            .map_err(|e| SideError::Other(e.into()))
    }
}
