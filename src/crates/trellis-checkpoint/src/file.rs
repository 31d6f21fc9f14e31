//! Filesystem checkpoint store
//!
//! One live file per thread id under a root directory. Each file holds the
//! thread's history as a length-prefixed sequence of JSON-serialized
//! [`Checkpoint`] records, newest first (u64 little-endian byte length,
//! then the record bytes). Writes land in a temporary file, are synced,
//! and are renamed over the live file, so a `put` is durable before it
//! returns and a crash can never leave a half-written history.
//!
//! [`release`](CheckpointStore::release) copies the live file to a
//! numbered backup (`<threadbase>-vN.ckpt`, N = previous max + 1) and
//! deletes the live file; the backup file name is the archive tag.
//!
//! Writers to the same thread id are serialized by a per-thread async
//! mutex; distinct threads proceed in parallel.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::store::{CheckpointStore, ReleasedHistory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const FILE_EXT: &str = "ckpt";

/// [`CheckpointStore`] persisting one file per thread id
pub struct FileCheckpointStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileCheckpointStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the thread files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn file_stem(thread_id: &str) -> String {
        // Thread ids may contain namespacing separators and other bytes
        // that are not filename-safe; escape them reversibly.
        let mut out = String::with_capacity(thread_id.len());
        for byte in thread_id.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                    out.push(byte as char)
                }
                other => out.push_str(&format!("%{other:02X}")),
            }
        }
        out
    }

    fn live_path(&self, thread_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{FILE_EXT}", Self::file_stem(thread_id)))
    }

    async fn read_history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let path = self.live_path(thread_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => decode_history(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_history(&self, thread_id: &str, history: &[Checkpoint]) -> Result<()> {
        let path = self.live_path(thread_id);
        let tmp = path.with_extension(format!("{FILE_EXT}.tmp"));
        let bytes = encode_history(history)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn next_backup_version(&self, stem: &str) -> Result<u64> {
        let prefix = format!("{stem}-v");
        let suffix = format!(".{FILE_EXT}");
        let mut max = 0u64;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(number) = rest.strip_suffix(&suffix) {
                    if let Ok(version) = number.parse::<u64>() {
                        max = max.max(version);
                    }
                }
            }
        }
        Ok(max + 1)
    }
}

fn encode_history(history: &[Checkpoint]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for checkpoint in history {
        let record = serde_json::to_vec(checkpoint)?;
        buf.extend_from_slice(&(record.len() as u64).to_le_bytes());
        buf.extend_from_slice(&record);
    }
    Ok(buf)
}

fn decode_history(mut data: &[u8]) -> Result<Vec<Checkpoint>> {
    let mut history = Vec::new();
    while !data.is_empty() {
        if data.len() < 8 {
            return Err(CheckpointError::Corrupt(
                "truncated record length prefix".to_string(),
            ));
        }
        let (prefix, rest) = data.split_at(8);
        let len = u64::from_le_bytes(prefix.try_into().expect("prefix is 8 bytes")) as usize;
        if rest.len() < len {
            return Err(CheckpointError::Corrupt(format!(
                "record claims {len} bytes, {} remain",
                rest.len()
            )));
        }
        let (record, remaining) = rest.split_at(len);
        history.push(serde_json::from_slice(record)?);
        data = remaining;
    }
    Ok(history)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;
        self.read_history(thread_id).await
    }

    async fn get(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Result<Option<Checkpoint>> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;
        let history = self.read_history(thread_id).await?;
        Ok(match checkpoint_id {
            Some(id) => history.into_iter().find(|c| c.id == id),
            None => history.into_iter().next(),
        })
    }

    async fn put(&self, thread_id: &str, checkpoint: Checkpoint) -> Result<()> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;
        let mut history = self.read_history(thread_id).await?;
        if let Some(slot) = history.iter_mut().find(|c| c.id == checkpoint.id) {
            *slot = checkpoint;
        } else {
            history.insert(0, checkpoint);
        }
        self.write_history(thread_id, &history).await
    }

    async fn clear(&self, thread_id: &str) -> Result<()> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(self.live_path(thread_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn release(&self, thread_id: &str) -> Result<ReleasedHistory> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;

        let history = self.read_history(thread_id).await?;
        let stem = Self::file_stem(thread_id);
        let version = self.next_backup_version(&stem).await?;
        let backup_name = format!("{stem}-v{version}.{FILE_EXT}");

        let live = self.live_path(thread_id);
        if tokio::fs::try_exists(&live).await? {
            tokio::fs::copy(&live, self.root.join(&backup_name)).await?;
            tokio::fs::remove_file(&live).await?;
        }

        Ok(ReleasedHistory {
            tag: backup_name,
            checkpoints: history,
        })
    }
}
