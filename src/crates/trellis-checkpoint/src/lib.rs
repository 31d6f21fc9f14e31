//! # trellis-checkpoint - state persistence for graph execution
//!
//! Channels, checkpoint data types, and pluggable checkpoint stores for
//! the trellis graph-execution engine. The engine in `trellis-core` calls
//! into this crate after every node step to snapshot state; callers use it
//! to inspect, resume, and archive runs.
//!
//! ## Pieces
//!
//! - **Channels** ([`channels`]) - per-key merge strategies applied when a
//!   partial update lands in the running state: [`LastValue`] (replace),
//!   [`Appender`] (append to a list), [`Reducer`] (combine with a binary
//!   function). A [`ChannelTable`] merges updates deterministically,
//!   independent of map iteration order.
//! - **Checkpoints** ([`checkpoint`]) - immutable snapshots carrying the
//!   full state plus the just-executed and next node ids, and optionally a
//!   [`PendingFeedback`] record when the run is suspended awaiting
//!   external decisions.
//! - **Store SPI** ([`store`]) - the [`CheckpointStore`] trait:
//!   `list` / `get` / `put` / `clear` / `release`, keyed by an opaque
//!   thread id; histories are newest first and `release` retires a thread
//!   atomically with an archive tag.
//! - **Backends** - [`MemoryCheckpointStore`] (process lifetime, single
//!   mutex), [`FileCheckpointStore`] (one length-prefixed record file per
//!   thread, numbered backups on release), and `SqliteCheckpointStore`
//!   behind the `sqlite` feature (one upserted row per thread).
//! - **Codecs** ([`codec`]) - a registered type-tag-to-codec table so
//!   domain types stored in state round-trip with exact type identity
//!   through every backend.
//!
//! ## Data flow
//!
//! ```text
//!   node update ──► ChannelTable::apply ──► StateData
//!                                             │ snapshot after each step
//!                                             ▼
//!                                     Checkpoint { values,
//!                                       node_id, next_node_id }
//!                                             │ put(thread_id, ..)
//!                                             ▼
//!                               CheckpointStore (memory / file / sqlite)
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use trellis_checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
//! use std::collections::HashMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryCheckpointStore::new();
//!
//! let snapshot = Checkpoint::new(HashMap::new(), "plan", "act");
//! store.put("session-1", snapshot).await?;
//!
//! let latest = store.get("session-1", None).await?.unwrap();
//! assert_eq!(latest.next_node_id, "act");
//!
//! let archive = store.release("session-1").await?;
//! println!("retired as {}", archive.tag);
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use channels::{Appender, Channel, ChannelTable, LastValue, Reducer, ReducerFn, StateData, StateUpdate};
pub use checkpoint::{Checkpoint, PendingFeedback, PendingItem};
pub use codec::CodecRegistry;
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use store::{CheckpointStore, ReleasedHistory, DEFAULT_THREAD_ID};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;
