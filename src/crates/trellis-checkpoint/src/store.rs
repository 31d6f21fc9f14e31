//! Pluggable checkpoint store SPI
//!
//! [`CheckpointStore`] is the interface every persistence backend
//! implements. A store holds, per opaque thread id, a newest-first list of
//! [`Checkpoint`] records. The engine calls `put` after every successful
//! node step and `get` when a run is resumed; `release` archives a finished
//! thread's history in one atomic move.
//!
//! # Contract
//!
//! - `list(thread)` returns the history newest first.
//! - `get(thread, None)` returns the newest checkpoint; `get(thread,
//!   Some(id))` returns that exact record.
//! - `put(thread, checkpoint)` replaces the entry with the same id in
//!   place if one exists (mid-flight state amendment), otherwise prepends
//!   the checkpoint as the newest entry. Writes are durable before `put`
//!   returns, and a `get` on the same thread afterwards observes them.
//! - `clear(thread)` drops the history without a trace.
//! - `release(thread)` atomically detaches the full history and returns it
//!   with an archive tag, freeing live storage while leaving an auditable
//!   trail.
//!
//! Backends must serialize concurrent writers to the *same* thread id but
//! must not serialize across distinct thread ids.
//!
//! # Implementations
//!
//! - [`MemoryCheckpointStore`](crate::memory::MemoryCheckpointStore) -
//!   process-lifetime, for tests and short-lived runs
//! - [`FileCheckpointStore`](crate::file::FileCheckpointStore) - one file
//!   per thread with numbered backups on release
//! - `SqliteCheckpointStore` (feature `sqlite`) - one row per thread,
//!   upserted on put

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Thread id used when a run configuration does not name one
pub const DEFAULT_THREAD_ID: &str = "default";

/// A thread's detached history, returned by [`CheckpointStore::release`]
#[derive(Debug, Clone)]
pub struct ReleasedHistory {
    /// Archive tag identifying where (or as what) the history was retired
    pub tag: String,

    /// The full history, newest first
    pub checkpoints: Vec<Checkpoint>,
}

/// Backend-agnostic checkpoint persistence interface
///
/// Implementations must be `Send + Sync`; one store instance is shared by
/// every run of a compiled graph. Callers never touch the persisted medium
/// directly.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// List a thread's checkpoints, newest first
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Fetch one checkpoint; `None` id means the newest
    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>>;

    /// Store a checkpoint: replace in place by id, or prepend as newest
    async fn put(&self, thread_id: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Drop a thread's history
    async fn clear(&self, thread_id: &str) -> Result<()>;

    /// Atomically detach and return a thread's history with an archive tag
    async fn release(&self, thread_id: &str) -> Result<ReleasedHistory>;
}
