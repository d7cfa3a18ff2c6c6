//! SQLite implementation of IMetadataStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! metadata store port defined in cozysync-core.
//!
//! ## Storage layout
//!
//! | Table      | Contents                                             |
//! |------------|------------------------------------------------------|
//! | `docs`     | latest body per id, with rev, sequence and tombstone |
//! | `doc_revs` | one row per (id, generation): the revision history   |
//! | `sync_meta`| store-wide sequence counter and the durable cursor   |
//!
//! Record bodies are serialized to JSON TEXT columns; ids, revs and the
//! tombstone flag are mirrored into their own columns so the change feed
//! can be served without parsing bodies.
//!
//! ## Concurrency
//!
//! `put` runs in a single transaction: conflict check, sequence
//! allocation, latest-row upsert and history insert commit together.
//! Live feed consumers are woken through a `tokio::sync::watch` channel
//! carrying the last committed sequence. The exclusive writer lock is a
//! plain async mutex whose owned guard is handed to the caller; readers
//! never touch it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use cozysync_core::domain::{DocId, Metadata, Rev};
use cozysync_core::ports::{
    Change, ChangesOptions, IMetadataStore, PutResult, StoreError, StoreLock,
};

/// Embedded schema, applied on open. Every statement is idempotent, so
/// re-opening an existing database is a no-op.
const SCHEMA: &str = include_str!("migrations/0001_initial.sql");

/// How long a writer waits on SQLite's own lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based implementation of the metadata store port
pub struct SqliteMetadataStore {
    pool: SqlitePool,
    committed_seq: watch::Sender<u64>,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteMetadataStore {
    /// Opens (or creates) the store at `db_path` and applies the schema.
    ///
    /// The database runs in WAL mode with `synchronous = NORMAL`: feed
    /// readers never block behind the single writer, and a torn last
    /// commit after a crash simply re-drives the engine from its durable
    /// cursor. Missing parent directories are created.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Query(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self::new(pool);
        store.apply_schema().await?;
        info!(path = %db_path.display(), "metadata store opened");
        Ok(store)
    }

    /// Opens a store backed by an in-memory database, mostly for tests.
    ///
    /// Capped at a single connection: an in-memory SQLite database lives
    /// and dies with its connection, so handing out a second one would
    /// silently read a different, empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let store = Self::new(pool);
        store.apply_schema().await?;
        Ok(store)
    }

    /// Wraps an already-configured connection pool. The caller is
    /// responsible for the schema; [`open`](Self::open) and
    /// [`in_memory`](Self::in_memory) are the usual entry points.
    pub fn new(pool: SqlitePool) -> Self {
        let (committed_seq, _) = watch::channel(0);
        Self {
            pool,
            committed_seq,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("schema setup failed: {e}")))?;
        Ok(())
    }

    async fn read_meta(&self, key: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT value FROM sync_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("value") as u64))
    }

    async fn write_meta(&self, key: &str, value: u64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

/// Maps a database failure onto the port error type
fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

/// Parses a JSON body column back into a metadata record
fn doc_from_body(body: &str) -> Result<Metadata, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Parses the `body` column of a row
fn doc_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Metadata, StoreError> {
    let body: String = row.get("body");
    doc_from_body(&body)
}

#[async_trait]
impl IMetadataStore for SqliteMetadataStore {
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        sqlx::raw_sql("CREATE INDEX IF NOT EXISTS docs_seq_idx ON docs (seq)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: &DocId) -> Result<Option<Metadata>, StoreError> {
        let row = sqlx::query("SELECT body FROM docs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(doc_from_row).transpose()
    }

    async fn get_previous_rev(
        &self,
        id: &DocId,
        rev_number: u64,
    ) -> Result<Option<Metadata>, StoreError> {
        let row = sqlx::query("SELECT body FROM doc_revs WHERE id = ? AND rev_num = ?")
            .bind(id.as_str())
            .bind(rev_number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(doc_from_row).transpose()
    }

    async fn put(&self, doc: &Metadata) -> Result<PutResult, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<String> = sqlx::query("SELECT rev FROM docs WHERE id = ?")
            .bind(doc.id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .map(|r| r.get("rev"));

        let matches = match (&doc.rev, &current) {
            (None, None) => true,
            (Some(rev), Some(stored)) => rev.as_str() == stored,
            _ => false,
        };
        if !matches {
            return Err(StoreError::Conflict {
                id: doc.id.as_str().to_string(),
            });
        }

        let seq = sqlx::query("SELECT value FROM sync_meta WHERE key = 'update_seq'")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?
            .get::<i64, _>("value") as u64
            + 1;
        sqlx::query("UPDATE sync_meta SET value = ? WHERE key = 'update_seq'")
            .bind(seq as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let number = doc.rev_number() + 1;
        let rev = Rev::from_parts(number, &Uuid::new_v4().simple().to_string());

        let mut stored = doc.clone();
        stored.rev = Some(rev.clone());
        let body =
            serde_json::to_string(&stored).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO docs (id, rev, seq, deleted, body) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
             rev = excluded.rev, seq = excluded.seq, \
             deleted = excluded.deleted, body = excluded.body",
        )
        .bind(stored.id.as_str())
        .bind(rev.as_str())
        .bind(seq as i64)
        .bind(stored.deleted)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("INSERT OR REPLACE INTO doc_revs (id, rev_num, rev, body) VALUES (?, ?, ?, ?)")
            .bind(stored.id.as_str())
            .bind(number as i64)
            .bind(rev.as_str())
            .bind(&body)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        debug!(id = %stored.id, rev = %rev, seq, "document written");
        self.committed_seq.send_replace(seq);

        Ok(PutResult { rev, seq })
    }

    async fn changes(&self, options: &ChangesOptions) -> Result<Vec<Change>, StoreError> {
        let mut sql =
            String::from("SELECT seq, id, deleted, body FROM docs WHERE seq > ?");
        if options.by_path {
            sql.push_str(" AND id NOT LIKE '\\_%' ESCAPE '\\'");
        }
        sql.push_str(" ORDER BY seq ASC");
        if options.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(options.since as i64);
        if let Some(limit) = options.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let doc = if options.include_docs {
                Some(doc_from_row(&row)?)
            } else {
                None
            };
            entries.push(Change {
                seq: row.get::<i64, _>("seq") as u64,
                id: DocId::new(row.get::<String, _>("id")),
                deleted: row.get("deleted"),
                doc,
            });
        }
        Ok(entries)
    }

    async fn wait_for_change(&self, since: u64) -> Result<(), StoreError> {
        let mut rx = self.committed_seq.subscribe();
        // Subscribe first, then check the durable counter, so a write
        // landing in between cannot be missed.
        if self.read_meta("update_seq").await? > since {
            return Ok(());
        }
        loop {
            if *rx.borrow_and_update() > since {
                return Ok(());
            }
            rx.changed()
                .await
                .map_err(|_| StoreError::Query("store closed while waiting".to_string()))?;
        }
    }

    async fn lock(&self) -> StoreLock {
        self.write_lock.clone().lock_owned().await
    }

    async fn get_local_seq(&self) -> Result<u64, StoreError> {
        self.read_meta("local_seq").await
    }

    async fn set_local_seq(&self, seq: u64) -> Result<(), StoreError> {
        self.write_meta("local_seq", seq).await
    }

    async fn get_all(&self) -> Result<Vec<Metadata>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM docs \
             WHERE deleted = 0 AND id NOT LIKE '\\_%' ESCAPE '\\' \
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(doc_from_row).collect()
    }
}
