//! SQLite-backed checkpoint store (feature `sqlite`)
//!
//! Persists each thread's history as one row: the thread id keys the row
//! and the full newest-first history is stored as a serialized JSON blob,
//! upserted on every `put`. `release` moves the row into an archive table
//! with a per-thread version counter, so the live table stays small while
//! the trail remains queryable.
//!
//! Statements run inside a transaction per operation; SQLite's writer lock
//! plus the transaction gives the per-thread write serialization the store
//! contract requires.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::store::{CheckpointStore, ReleasedHistory};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

/// [`CheckpointStore`] persisting one row per thread id in SQLite
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connect to a SQLite database and create the schema if needed
    ///
    /// `url` is a sqlx connection string, e.g. `sqlite::memory:` or
    /// `sqlite://trellis.db?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self> {
        // One connection: keeps `sqlite::memory:` databases coherent and
        // matches SQLite's single-writer model.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trellis_threads (
                 thread_id  TEXT PRIMARY KEY,
                 history    TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trellis_archives (
                 thread_id   TEXT NOT NULL,
                 version     INTEGER NOT NULL,
                 history     TEXT NOT NULL,
                 released_at TEXT NOT NULL,
                 PRIMARY KEY (thread_id, version)
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let row = sqlx::query("SELECT history FROM trellis_threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let blob: String = row.get("history");
                serde_json::from_str(&blob).map_err(|err| {
                    CheckpointError::Corrupt(format!("thread {thread_id}: {err}"))
                })
            }
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        self.load_history(thread_id).await
    }

    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>> {
        let history = self.load_history(thread_id).await?;
        Ok(match checkpoint_id {
            Some(id) => history.into_iter().find(|c| c.id == id),
            None => history.into_iter().next(),
        })
    }

    async fn put(&self, thread_id: &str, checkpoint: Checkpoint) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT history FROM trellis_threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;
        let mut history: Vec<Checkpoint> = match row {
            Some(row) => {
                let blob: String = row.get("history");
                serde_json::from_str(&blob).map_err(|err| {
                    CheckpointError::Corrupt(format!("thread {thread_id}: {err}"))
                })?
            }
            None => Vec::new(),
        };

        if let Some(slot) = history.iter_mut().find(|c| c.id == checkpoint.id) {
            *slot = checkpoint;
        } else {
            history.insert(0, checkpoint);
        }

        let blob = serde_json::to_string(&history)?;
        sqlx::query(
            "INSERT INTO trellis_threads (thread_id, history, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(thread_id) DO UPDATE SET
               history = excluded.history,
               updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, thread_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM trellis_threads WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, thread_id: &str) -> Result<ReleasedHistory> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT history FROM trellis_threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;
        let history: Vec<Checkpoint> = match row {
            Some(row) => {
                let blob: String = row.get("history");
                serde_json::from_str(&blob).map_err(|err| {
                    CheckpointError::Corrupt(format!("thread {thread_id}: {err}"))
                })?
            }
            None => Vec::new(),
        };

        let version_row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS version
             FROM trellis_archives WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_one(&mut *tx)
        .await?;
        let version: i64 = version_row.get("version");
        let version = version + 1;

        if !history.is_empty() {
            sqlx::query(
                "INSERT INTO trellis_archives (thread_id, version, history, released_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(thread_id)
            .bind(version)
            .bind(serde_json::to_string(&history)?)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM trellis_threads WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReleasedHistory {
            tag: format!("{thread_id}-v{version}"),
            checkpoints: history,
        })
    }
}
