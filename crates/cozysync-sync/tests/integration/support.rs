//! Shared test helpers: recording stub sides, a controllable watcher,
//! store setup and record builders.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use cozysync_core::config::Config;
use cozysync_core::domain::{Checksum, DocId, DocType, Metadata, SideName, SyncPath};
use cozysync_core::ports::{DiskUsage, IMetadataStore, ISide, IWatcher, SideError};
use cozysync_store::SqliteMetadataStore;
use cozysync_sync::engine::EngineOptions;
use cozysync_sync::SyncEngine;

/// md5 of "foo\n"
pub const MD5_FOO: &str = "rL0Y20zC+Fzt72VPzMSk2A==";
/// md5 of the empty string
pub const MD5_EMPTY: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

// ============================================================================
// Store and engine setup
// ============================================================================

pub async fn setup_store() -> Arc<SqliteMetadataStore> {
    let store = SqliteMetadataStore::in_memory()
        .await
        .expect("Failed to create in-memory store");
    Arc::new(store)
}

/// Engine with delays shrunk for tests.
pub fn test_engine(
    store: Arc<SqliteMetadataStore>,
    local: Arc<RecordingSide>,
    remote: Arc<RecordingSide>,
) -> SyncEngine {
    SyncEngine::new(store, local, remote, &Config::default()).with_options(EngineOptions {
        offline_probe_interval: Duration::from_millis(50),
        trashing_delay: Duration::from_millis(20),
        heartbeat: Duration::from_millis(20),
        max_doc_errors: 3,
    })
}

// ============================================================================
// Record builders
// ============================================================================

pub fn file_doc(path: &str, md5: &str) -> Metadata {
    let sync_path = SyncPath::new(path).unwrap();
    let mut doc = Metadata::new(DocId::new(path), sync_path, DocType::File);
    doc.md5sum = Some(Checksum::new(md5).unwrap());
    doc.size = Some(4);
    doc
}

pub fn folder_doc(path: &str) -> Metadata {
    let sync_path = SyncPath::new(path).unwrap();
    Metadata::new(DocId::new(path), sync_path, DocType::Folder)
}

/// Upserts a record the way a watcher would: the given side's counter is
/// bumped past the stored revision before the put.
pub async fn upsert_as(
    store: &SqliteMetadataStore,
    side: SideName,
    mut doc: Metadata,
) -> Metadata {
    let prev = store.get(&doc.id).await.unwrap();
    doc.rev = prev.as_ref().and_then(|p| p.rev.clone());
    doc.mark_side(side, prev.as_ref());
    let result = store.put(&doc).await.unwrap();
    doc.rev = Some(result.rev);
    doc
}

/// Marks a record quiescent, the way the opposite watcher's merge would
/// once it observed the applied change.
pub async fn settle(store: &SqliteMetadataStore, id: &DocId) {
    let mut doc = store.get(id).await.unwrap().expect("doc to settle");
    let number = doc.rev_number() + 1;
    doc.sides.local = number;
    doc.sides.remote = number;
    store.put(&doc).await.unwrap();
}

// ============================================================================
// RecordingSide
// ============================================================================

type Hook = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One recorded side operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideCall {
    pub op: &'static str,
    pub path: String,
}

/// Stub side that records every call and can be scripted to fail or to
/// run a one-shot hook (e.g. a concurrent store write) inside a call.
#[derive(Default)]
pub struct RecordingSide {
    calls: Mutex<Vec<SideCall>>,
    failures: Mutex<HashMap<&'static str, Vec<SideError>>>,
    disk_usage: Mutex<Vec<Result<DiskUsage, SideError>>>,
    hooks: Mutex<HashMap<&'static str, Vec<Hook>>>,
}

impl RecordingSide {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scripts the next call to `op` to fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: SideError) {
        self.failures.lock().unwrap().entry(op).or_default().push(err);
    }

    /// Scripts the next `disk_usage` probe (defaults to success).
    pub fn script_disk_usage(&self, result: Result<DiskUsage, SideError>) {
        self.disk_usage.lock().unwrap().push(result);
    }

    /// Runs `hook` inside the next successful call to `op`.
    pub fn on_next(&self, op: &'static str, hook: Hook) {
        self.hooks.lock().unwrap().entry(op).or_default().push(hook);
    }

    pub fn calls(&self) -> Vec<SideCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn called_with(&self, op: &str, path: &str) -> bool {
        self.calls().iter().any(|c| c.op == op && c.path == path)
    }

    async fn record(&self, op: &'static str, path: &str) -> Result<(), SideError> {
        self.calls.lock().unwrap().push(SideCall {
            op,
            path: path.to_string(),
        });
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(|q| (!q.is_empty()).then(|| q.remove(0)));
        if let Some(err) = failure {
            return Err(err);
        }
        let hook = self
            .hooks
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(|q| (!q.is_empty()).then(|| q.remove(0)));
        if let Some(hook) = hook {
            hook.await;
        }
        Ok(())
    }
}

#[async_trait]
impl ISide for RecordingSide {
    async fn add_file(&self, doc: &Metadata) -> Result<(), SideError> {
        self.record("add_file", doc.path.as_str()).await
    }

    async fn add_folder(&self, doc: &Metadata) -> Result<(), SideError> {
        self.record("add_folder", doc.path.as_str()).await
    }

    async fn overwrite_file(
        &self,
        doc: &Metadata,
        _old: Option<&Metadata>,
    ) -> Result<(), SideError> {
        self.record("overwrite_file", doc.path.as_str()).await
    }

    async fn update_file_metadata(
        &self,
        doc: &Metadata,
        _old: &Metadata,
    ) -> Result<(), SideError> {
        self.record("update_file_metadata", doc.path.as_str()).await
    }

    async fn update_folder(&self, doc: &Metadata, _old: &Metadata) -> Result<(), SideError> {
        self.record("update_folder", doc.path.as_str()).await
    }

    async fn move_file(&self, doc: &Metadata, _from: &Metadata) -> Result<(), SideError> {
        self.record("move_file", doc.path.as_str()).await
    }

    async fn move_folder(&self, doc: &Metadata, _from: &Metadata) -> Result<(), SideError> {
        self.record("move_folder", doc.path.as_str()).await
    }

    async fn trash(&self, doc: &Metadata) -> Result<(), SideError> {
        self.record("trash", doc.path.as_str()).await
    }

    async fn delete_folder(&self, doc: &Metadata) -> Result<(), SideError> {
        self.record("delete_folder", doc.path.as_str()).await
    }

    async fn assign_new_rev(&self, doc: &Metadata) -> Result<(), SideError> {
        self.record("assign_new_rev", doc.path.as_str()).await
    }

    async fn disk_usage(&self) -> Result<DiskUsage, SideError> {
        let scripted = {
            let mut queue = self.disk_usage.lock().unwrap();
            (!queue.is_empty()).then(|| queue.remove(0))
        };
        match scripted {
            Some(result) => result,
            None => Ok(DiskUsage {
                used: 0,
                quota: None,
            }),
        }
    }
}

// ============================================================================
// StubWatcher
// ============================================================================

/// Watcher stub whose failure can be triggered from the test.
#[derive(Default)]
pub struct StubWatcher {
    started: AtomicBool,
    stopped: AtomicBool,
    failure: Notify,
}

impl StubWatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Makes `running` resolve with an error.
    pub fn explode(&self) {
        self.failure.notify_one();
    }
}

#[async_trait]
impl IWatcher for StubWatcher {
    async fn start(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn running(&self) -> anyhow::Result<()> {
        self.failure.notified().await;
        Err(anyhow::anyhow!("watcher process exited unexpectedly"))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Misc
// ============================================================================

/// Remaining feed entries past the engine's cursor.
pub async fn pending_changes(store: &SqliteMetadataStore) -> usize {
    let seq = store.get_local_seq().await.unwrap();
    store
        .changes(&cozysync_core::ports::ChangesOptions {
            since: seq,
            limit: None,
            include_docs: false,
            by_path: true,
        })
        .await
        .unwrap()
        .len()
}
