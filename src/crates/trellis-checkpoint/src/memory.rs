//! In-memory checkpoint store
//!
//! Keeps every thread's history in a `HashMap` behind a single
//! `parking_lot::Mutex`. Adequate for moderate concurrency; the lock is
//! held only for the map operation itself, never across an await point.
//! Data lives for the process lifetime and is lost on restart, which makes
//! this the backend of choice for tests and short-lived runs.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::store::{CheckpointStore, ReleasedHistory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct MemoryInner {
    /// Thread id -> history, newest first
    threads: HashMap<String, Vec<Checkpoint>>,
    /// Thread id -> number of releases so far, for archive tags
    released: HashMap<String, u64>,
}

/// Process-lifetime [`CheckpointStore`] backed by a locked `HashMap`
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads currently holding a live history
    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.lock();
        Ok(inner.threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>> {
        let inner = self.inner.lock();
        let history = match inner.threads.get(thread_id) {
            Some(history) => history,
            None => return Ok(None),
        };
        Ok(match checkpoint_id {
            Some(id) => history.iter().find(|c| c.id == id).cloned(),
            None => history.first().cloned(),
        })
    }

    async fn put(&self, thread_id: &str, checkpoint: Checkpoint) -> Result<()> {
        let mut inner = self.inner.lock();
        let history = inner.threads.entry(thread_id.to_string()).or_default();
        if let Some(slot) = history.iter_mut().find(|c| c.id == checkpoint.id) {
            *slot = checkpoint;
        } else {
            history.insert(0, checkpoint);
        }
        Ok(())
    }

    async fn clear(&self, thread_id: &str) -> Result<()> {
        self.inner.lock().threads.remove(thread_id);
        Ok(())
    }

    async fn release(&self, thread_id: &str) -> Result<ReleasedHistory> {
        let mut inner = self.inner.lock();
        let checkpoints = inner.threads.remove(thread_id).unwrap_or_default();
        let count = inner.released.entry(thread_id.to_string()).or_insert(0);
        *count += 1;
        Ok(ReleasedHistory {
            tag: format!("{thread_id}-v{count}"),
            checkpoints,
        })
    }
}
