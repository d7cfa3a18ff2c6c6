//! Engine lifecycle: watcher startup per mode, live feed wakeups,
//! graceful stop and watcher death.

use std::sync::Arc;
use std::time::Duration;

use cozysync_core::config::SyncMode;
use cozysync_core::domain::SideName;
use cozysync_core::ports::IMetadataStore;

use crate::support::*;

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn test_start_and_stop_with_watchers() {
    let store = setup_store().await;
    let local = RecordingSide::new();
    let remote = RecordingSide::new();
    let local_watcher = StubWatcher::new();
    let remote_watcher = StubWatcher::new();

    let engine = Arc::new(
        test_engine(store.clone(), local, remote)
            .with_local_watcher(local_watcher.clone())
            .with_remote_watcher(remote_watcher.clone()),
    );

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start(SyncMode::Full).await })
    };

    eventually(|| local_watcher.started() && remote_watcher.started()).await;

    engine.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("engine should stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(local_watcher.stopped());
    assert!(remote_watcher.stopped());
}

#[tokio::test]
async fn test_pull_mode_skips_the_local_watcher() {
    let store = setup_store().await;
    let local_watcher = StubWatcher::new();
    let remote_watcher = StubWatcher::new();

    let engine = Arc::new(
        test_engine(store.clone(), RecordingSide::new(), RecordingSide::new())
            .with_local_watcher(local_watcher.clone())
            .with_remote_watcher(remote_watcher.clone()),
    );

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start(SyncMode::Pull).await })
    };

    eventually(|| remote_watcher.started()).await;
    assert!(!local_watcher.started());

    engine.stop().await;
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("engine should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_push_mode_skips_the_remote_watcher() {
    let store = setup_store().await;
    let local_watcher = StubWatcher::new();
    let remote_watcher = StubWatcher::new();

    let engine = Arc::new(
        test_engine(store.clone(), RecordingSide::new(), RecordingSide::new())
            .with_local_watcher(local_watcher.clone())
            .with_remote_watcher(remote_watcher.clone()),
    );

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start(SyncMode::Push).await })
    };

    eventually(|| local_watcher.started()).await;
    assert!(!remote_watcher.started());

    engine.stop().await;
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("engine should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_watcher_death_aborts_the_engine() {
    let store = setup_store().await;
    let local_watcher = StubWatcher::new();
    let remote_watcher = StubWatcher::new();

    let engine = Arc::new(
        test_engine(store.clone(), RecordingSide::new(), RecordingSide::new())
            .with_local_watcher(local_watcher.clone())
            .with_remote_watcher(remote_watcher.clone()),
    );

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start(SyncMode::Full).await })
    };

    eventually(|| local_watcher.started()).await;
    local_watcher.explode();

    let result = tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("engine should abort")
        .unwrap();
    assert!(result.is_err(), "a dead watcher is fatal");
    assert!(engine.stopped());
    assert!(remote_watcher.stopped(), "the other watcher is shut down too");
}

#[tokio::test]
async fn test_live_feed_wakes_the_running_engine() {
    let store = setup_store().await;
    let local = RecordingSide::new();
    let remote = RecordingSide::new();

    let engine = Arc::new(test_engine(store.clone(), local, remote.clone()));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start(SyncMode::Full).await })
    };

    // Give the engine a moment to park on the change feed, then write.
    tokio::time::sleep(Duration::from_millis(50)).await;
    upsert_as(&store, SideName::Local, file_doc("live.txt", MD5_FOO)).await;

    eventually(|| remote.count("add_file") == 1).await;
    let stored = store
        .get(&cozysync_core::domain::DocId::new("live.txt"))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.up_to_date());

    engine.stop().await;
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("engine should stop")
        .unwrap()
        .unwrap();
}
