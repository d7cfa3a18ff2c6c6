//! The reconciliation loop
//!
//! [`SyncEngine`] drives both sides toward agreement. External watchers
//! upsert metadata records into the store; the engine waits on the
//! change feed, takes the store's writer lock, and drains one change at
//! a time: pick the lagging side, classify the operation, apply it
//! through the side port, bump the per-side revision counters, advance
//! the durable cursor.
//!
//! ## Crash safety
//!
//! The cursor is only advanced *after* a side application succeeded, so
//! a crash at any point either resumes at the last durable cursor
//! (re-applying at most one change, which side operations tolerate by
//! being idempotent) or right after a fully applied change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, instrument, warn};

use cozysync_core::config::{Config, SyncConfig, SyncMode};
use cozysync_core::domain::{Metadata, SideName, Sides};
use cozysync_core::ports::{
    Change, ChangesOptions, IMetadataStore, ISide, IWatcher, SideError, StoreError,
};

use crate::classifier::{self, Plan, SkipReason, SyncAction};
use crate::errors::{self, SyncError};

// ============================================================================
// Events
// ============================================================================

/// Progress notifications for observers (UI, logs, tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A synchronization pass began
    Started,
    /// One change was taken off the feed at this sequence
    Current(u64),
    /// The synchronization pass finished and released the store lock
    Ended,
    /// The remote became unreachable; the engine is waiting it out
    Offline,
    /// The remote is reachable again
    Online,
}

/// Predicate deciding which records the engine must not touch
pub type IgnorePredicate = Arc<dyn Fn(&Metadata) -> bool + Send + Sync>;

// ============================================================================
// Engine options
// ============================================================================

/// Consecutive same-cursor iterations tolerated before a pass yields
/// back to the outer loop instead of spinning.
const MAX_NO_PROGRESS: u32 = 3;

/// Tuning knobs of the reconciliation loop, usually taken from
/// [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Delay between connectivity probes while offline
    pub offline_probe_interval: Duration,
    /// Grace period for a racing parent deletion
    pub trashing_delay: Duration,
    /// One remote-watcher polling cycle
    pub heartbeat: Duration,
    /// Consecutive failures before a document is skipped
    pub max_doc_errors: u32,
}

impl From<&SyncConfig> for EngineOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            offline_probe_interval: config.offline_probe_interval(),
            trashing_delay: config.trashing_delay(),
            heartbeat: config.heartbeat(),
            max_doc_errors: config.max_doc_errors,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Bidirectional synchronization engine
///
/// ## Dependencies
///
/// - `store`: the durable metadata store and its change feed
/// - `local` / `remote`: the two side adapters, addressed generically
/// - watchers (optional): lifecycle-managed producers of metadata upserts
pub struct SyncEngine {
    pub(crate) store: Arc<dyn IMetadataStore>,
    pub(crate) local: Arc<dyn ISide>,
    pub(crate) remote: Arc<dyn ISide>,
    local_watcher: Option<Arc<dyn IWatcher>>,
    remote_watcher: Option<Arc<dyn IWatcher>>,
    ignore: IgnorePredicate,
    events: broadcast::Sender<SyncEvent>,
    stopped: AtomicBool,
    stop_notify: Notify,
    pub(crate) options: EngineOptions,
}

impl SyncEngine {
    /// Creates an engine over the given store and sides, tuned from the
    /// application configuration.
    pub fn new(
        store: Arc<dyn IMetadataStore>,
        local: Arc<dyn ISide>,
        remote: Arc<dyn ISide>,
        config: &Config,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            local,
            remote,
            local_watcher: None,
            remote_watcher: None,
            ignore: Arc::new(|_| false),
            events,
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            options: EngineOptions::from(&config.sync),
        }
    }

    /// Attaches the local watcher; started by [`start`](Self::start)
    /// unless the mode is pull-only.
    pub fn with_local_watcher(mut self, watcher: Arc<dyn IWatcher>) -> Self {
        self.local_watcher = Some(watcher);
        self
    }

    /// Attaches the remote watcher; started by [`start`](Self::start)
    /// unless the mode is push-only.
    pub fn with_remote_watcher(mut self, watcher: Arc<dyn IWatcher>) -> Self {
        self.remote_watcher = Some(watcher);
        self
    }

    /// Installs the ignore predicate applied to every record before
    /// classification.
    pub fn with_ignore(mut self, ignore: IgnorePredicate) -> Self {
        self.ignore = ignore;
        self
    }

    /// Overrides the tuning knobs; mostly useful to shrink the delays
    /// in tests.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribes to engine progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Whether a stop was requested.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn side(&self, name: SideName) -> &Arc<dyn ISide> {
        match name {
            SideName::Local => &self.local,
            SideName::Remote => &self.remote,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Runs the engine until it is stopped or fails.
    ///
    /// Starts the watchers selected by `mode` (pull skips the local one,
    /// push skips the remote one), then loops synchronization passes. A
    /// watcher dying or a fatal error aborts the loop, stops everything
    /// and surfaces the error.
    pub async fn start(&self, mode: SyncMode) -> Result<(), SyncError> {
        self.store.ensure_indexes().await?;

        let mut active: Vec<Arc<dyn IWatcher>> = Vec::new();
        if mode != SyncMode::Pull {
            if let Some(watcher) = &self.local_watcher {
                watcher.start().await.map_err(SyncError::Other)?;
                active.push(Arc::clone(watcher));
            }
        }
        if mode != SyncMode::Push {
            if let Some(watcher) = &self.remote_watcher {
                watcher.start().await.map_err(SyncError::Other)?;
                active.push(Arc::clone(watcher));
            }
        }

        info!(?mode, "synchronization started");

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);
        for watcher in &active {
            let watcher = Arc::clone(watcher);
            let fatal_tx = fatal_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = watcher.running().await {
                    let _ = fatal_tx.send(err).await;
                }
            });
        }
        drop(fatal_tx);

        loop {
            if self.stopped() {
                return Ok(());
            }
            tokio::select! {
                Some(err) = fatal_rx.recv() => {
                    error!(error = %err, "watcher died, aborting synchronization");
                    self.stop().await;
                    return Err(SyncError::Other(err));
                }
                result = self.sync(true) => {
                    if let Err(err) = result {
                        self.stop().await;
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Requests a stop: cancels the live feed wait and stops the
    /// watchers. In-flight side operations complete or fail naturally.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping synchronization");
        self.stop_notify.notify_waiters();
        for watcher in [&self.local_watcher, &self.remote_watcher]
            .into_iter()
            .flatten()
        {
            if let Err(err) = watcher.stop().await {
                warn!(error = %err, "failed to stop watcher");
            }
        }
    }

    // ========================================================================
    // One synchronization pass
    // ========================================================================

    /// Performs one synchronization pass.
    ///
    /// With `wait`, first blocks until the feed moves past the durable
    /// cursor (this is where the engine idles). Then takes the store's
    /// writer lock and drains available changes one at a time.
    #[instrument(skip(self))]
    pub async fn sync(&self, wait: bool) -> Result<(), SyncError> {
        let seq = self.store.get_local_seq().await?;

        if wait {
            let notified = self.stop_notify.notified();
            tokio::pin!(notified);
            // Register for the stop signal before re-checking the flag,
            // so a stop landing in between cannot be lost.
            notified.as_mut().enable();
            if self.stopped() {
                return Ok(());
            }
            tokio::select! {
                _ = &mut notified => return Ok(()),
                result = self.store.wait_for_change(seq) => result?,
            }
        }

        self.emit(SyncEvent::Started);
        let guard = self.store.lock().await;
        let result = self.drain().await;
        drop(guard);
        self.emit(SyncEvent::Ended);
        result
    }

    /// Consumes feed entries past the cursor until none are left, one
    /// entry per iteration regardless of how the store batches them.
    async fn drain(&self) -> Result<(), SyncError> {
        let mut last_seq: Option<u64> = None;
        let mut no_progress = 0u32;

        loop {
            if self.stopped() {
                return Ok(());
            }

            let seq = self.store.get_local_seq().await?;
            if last_seq == Some(seq) {
                no_progress += 1;
                warn!(seq, "sync made no progress since the last iteration");
                if no_progress >= MAX_NO_PROGRESS {
                    warn!(seq, "still stuck on the same change, yielding");
                    return Ok(());
                }
            } else {
                last_seq = Some(seq);
                no_progress = 0;
            }

            let changes = self
                .store
                .changes(&ChangesOptions {
                    since: seq,
                    limit: Some(1),
                    include_docs: true,
                    by_path: true,
                })
                .await?;
            let Some(change) = changes.into_iter().next() else {
                return Ok(());
            };

            self.emit(SyncEvent::Current(change.seq));

            if let Err(err) = self.apply(&change).await {
                if self.stopped() {
                    debug!(error = %err, "apply failed during shutdown, ignoring");
                    return Ok(());
                }
                return Err(err);
            }
        }
    }

    // ========================================================================
    // Applying one change
    // ========================================================================

    /// Applies one feed entry and advances the cursor, unless the entry
    /// was deferred or its failure left it to be retried.
    async fn apply(&self, change: &Change) -> Result<(), SyncError> {
        let Some(doc) = &change.doc else {
            warn!(seq = change.seq, id = %change.id, "change without a document, skipping");
            self.store.set_local_seq(change.seq).await?;
            return Ok(());
        };

        if (self.ignore)(doc) {
            debug!(path = %doc.path, "ignored");
            self.store.set_local_seq(change.seq).await?;
            return Ok(());
        }

        let Some((side_name, rev)) = doc.select_side() else {
            debug!(path = %doc.path, "up to date");
            self.store.set_local_seq(change.seq).await?;
            return Ok(());
        };

        debug!(path = %doc.path, side = %side_name, seq = change.seq, "applying change");

        let outcome = if side_name == SideName::Remote && doc.trashed {
            self.trash_with_parent(doc).await
        } else {
            self.apply_doc(doc, side_name, rev).await.map(|()| true)
        };

        match outcome {
            // Deferred: a later feed entry re-drives this record.
            Ok(false) => Ok(()),
            Ok(true) => {
                self.store.set_local_seq(change.seq).await?;
                if !doc.deleted {
                    self.update_revs(doc, side_name).await?;
                }
                Ok(())
            }
            Err(err) => self.handle_apply_error(change, doc, err).await,
        }
    }

    /// Classifies and executes the side operation for one record.
    async fn apply_doc(
        &self,
        doc: &Metadata,
        side_name: SideName,
        rev: u64,
    ) -> Result<(), SideError> {
        let (action, prev) = match classifier::initial_action(doc, side_name, rev) {
            Plan::Do(action) => (action, None),
            Plan::CompareWithPrev => {
                let prev = self
                    .store
                    .get_previous_rev(&doc.id, rev)
                    .await
                    .map_err(|e| SideError::Other(e.into()))?;
                (classifier::update_action(doc, prev.as_ref()), prev)
            }
        };

        debug!(path = %doc.path, side = %side_name, ?action, "classified");
        self.execute(self.side(side_name).as_ref(), doc, prev.as_ref(), action)
            .await
    }

    /// Maps one classified action onto the side port.
    async fn execute(
        &self,
        side: &dyn ISide,
        doc: &Metadata,
        prev: Option<&Metadata>,
        action: SyncAction,
    ) -> Result<(), SideError> {
        match action {
            SyncAction::AddFile => side.add_file(doc).await,
            SyncAction::AddFolder => side.add_folder(doc).await,
            SyncAction::MoveFile => side.move_file(doc, moved_from(doc)?).await,
            SyncAction::MoveFolder => side.move_folder(doc, moved_from(doc)?).await,
            SyncAction::Overwrite => side.overwrite_file(doc, prev).await,
            SyncAction::UpdateFileMetadata => {
                side.update_file_metadata(doc, known_prev(doc, prev)?).await
            }
            SyncAction::UpdateFolder => side.update_folder(doc, known_prev(doc, prev)?).await,
            SyncAction::Trash => side.trash(doc).await,
            SyncAction::DeleteFolder => side.delete_folder(doc).await,
            SyncAction::AssignNewRev => side.assign_new_rev(doc).await,
            SyncAction::TrashFormerCopy => {
                let was = moved_from(doc)?;
                warn!(
                    path = %doc.path,
                    former = %was.path,
                    "renamed to a platform-incompatible path, trashing the former copy"
                );
                side.trash(was).await
            }
            SyncAction::Skip(reason) => {
                match reason {
                    SkipReason::Incompatible => {
                        warn!(path = %doc.path, "cannot be materialized on this platform, skipping")
                    }
                    _ => debug!(path = %doc.path, %reason, "nothing to do"),
                }
                Ok(())
            }
        }
    }

    // ========================================================================
    // Revision bookkeeping
    // ========================================================================

    /// Records that both sides now agree on this record: both counters
    /// jump to one past the applied revision, the error count resets and
    /// the move bookkeeping is cleared.
    async fn update_revs(&self, doc: &Metadata, side_name: SideName) -> Result<(), SyncError> {
        let mut updated = doc.clone();
        let number = updated.rev_number() + 1;
        updated.sides = Sides {
            local: number,
            remote: number,
        };
        updated.errors = 0;
        updated.move_from = None;
        updated.move_to = None;
        updated.child_move = false;

        match self.store.put(&updated).await {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                // A watcher committed a newer version in the meantime:
                // reapply only this side's bump on top of it.
                match self.store.get(&doc.id).await {
                    Ok(Some(mut latest)) => {
                        let number = latest.rev_number() + 1;
                        latest.sides.set(side_name, number);
                        if let Err(err) = self.store.put(&latest).await {
                            warn!(
                                path = %doc.path,
                                error = %err,
                                "lost the revision race twice, letting the feed settle it"
                            );
                        }
                    }
                    Ok(None) => {
                        warn!(path = %doc.path, "document vanished while updating side revisions")
                    }
                    Err(err) => {
                        warn!(path = %doc.path, error = %err, "could not reload after revision conflict")
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    path = %doc.path,
                    error = %err,
                    "could not update side revisions, assuming a newer change supersedes this one"
                );
                Ok(())
            }
        }
    }

    // ========================================================================
    // Failure handling
    // ========================================================================

    /// Routes a failed application: conclusive failures become fatal,
    /// an unreachable remote parks the engine in the offline loop, and
    /// anything else charges the record's retry budget.
    async fn handle_apply_error(
        &self,
        change: &Change,
        doc: &Metadata,
        err: SideError,
    ) -> Result<(), SyncError> {
        error!(path = %doc.path, error = %err, "failed to apply change");

        if let Some(fatal) = errors::fatal_for(&err) {
            return Err(fatal);
        }

        match self.remote.disk_usage().await {
            Ok(_) => self.update_errors(change, doc).await,
            Err(probe_err) => {
                if let Some(fatal) = errors::fatal_for_probe(&probe_err) {
                    return Err(fatal);
                }
                self.wait_until_online().await;
                // Back online; the unadvanced cursor retries the change.
                Ok(())
            }
        }
    }

    /// Probes the remote until it answers again.
    ///
    /// Keeps probing even when a stop was requested; only process exit
    /// interrupts it.
    async fn wait_until_online(&self) {
        self.emit(SyncEvent::Offline);
        warn!("remote unreachable, waiting for it to come back");
        loop {
            tokio::time::sleep(self.options.offline_probe_interval).await;
            match self.remote.disk_usage().await {
                Ok(_) => break,
                Err(err) => debug!(error = %err, "still offline"),
            }
        }
        info!("remote reachable again");
        self.emit(SyncEvent::Online);
    }

    /// Charges one failure against the record. Within budget, the saved
    /// count re-enters the feed and the unadvanced cursor retries the
    /// change; at the budget the cursor moves past it and the record
    /// stays poisoned until a newer revision arrives from either side.
    async fn update_errors(&self, change: &Change, doc: &Metadata) -> Result<(), SyncError> {
        let mut updated = doc.clone();
        updated.errors += 1;

        if updated.errors >= self.options.max_doc_errors {
            warn!(
                path = %doc.path,
                errors = updated.errors,
                "giving up on this change until a newer revision supersedes it"
            );
            match self.store.put(&updated).await {
                Ok(result) => self.store.set_local_seq(result.seq).await?,
                Err(_) => self.store.set_local_seq(change.seq).await?,
            }
            return Ok(());
        }

        if let Err(err) = self.store.put(&updated).await {
            // The record was already superseded by a newer revision.
            debug!(path = %doc.path, error = %err, "error count not saved, moving on");
            self.store.set_local_seq(change.seq).await?;
        }
        Ok(())
    }
}

fn moved_from(doc: &Metadata) -> Result<&Metadata, SideError> {
    doc.move_from.as_deref().ok_or_else(|| {
        SideError::Other(anyhow::anyhow!(
            "move operation without prior state for {}",
            doc.path
        ))
    })
}

fn known_prev<'a>(doc: &Metadata, prev: Option<&'a Metadata>) -> Result<&'a Metadata, SideError> {
    prev.ok_or_else(|| {
        SideError::Other(anyhow::anyhow!(
            "metadata update without prior state for {}",
            doc.path
        ))
    })
}
