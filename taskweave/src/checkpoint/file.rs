//! Append-only JSON-lines checkpoint store.

use super::{CheckpointEntry, CheckpointKey, CheckpointStore, CommitStatus};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Checkpoint store persisted as one JSON object per line.
///
/// Every commit is flushed with `fsync` before it is acknowledged. On open
/// the log is replayed into memory. A trailing partial line left by a crash
/// is dropped and truncated away; an unreadable line anywhere else is
/// reported as [`CheckpointError::Corrupt`].
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    index: DashMap<CheckpointKey, CheckpointEntry>,
    writer: Mutex<LogWriter>,
}

/// Entries recovered from a log and the byte length of its valid prefix.
struct Replay {
    entries: Vec<CheckpointEntry>,
    valid_len: usize,
}

fn replay(contents: &[u8]) -> Result<Replay, CheckpointError> {
    let lines: Vec<&[u8]> = contents.split_inclusive(|byte| *byte == b'\n').collect();
    let mut entries = Vec::new();
    let mut valid_len = 0;

    for (i, line) in lines.iter().enumerate() {
        let is_last = i + 1 == lines.len();
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim_end(),
            Err(err) if is_last => {
                tracing::warn!(line = i + 1, error = %err, "Dropping torn checkpoint record");
                break;
            }
            Err(err) => {
                return Err(CheckpointError::Corrupt {
                    line: i + 1,
                    reason: err.to_string(),
                });
            }
        };
        if text.is_empty() {
            valid_len += line.len();
            continue;
        }

        match serde_json::from_str::<CheckpointEntry>(text) {
            Ok(entry) if line.ends_with(b"\n") => {
                entries.push(entry);
                valid_len += line.len();
            }
            Ok(_) => {
                tracing::warn!(line = i + 1, "Dropping unterminated checkpoint record");
                break;
            }
            Err(err) if is_last => {
                tracing::warn!(line = i + 1, error = %err, "Dropping torn checkpoint record");
                break;
            }
            Err(err) => {
                return Err(CheckpointError::Corrupt {
                    line: i + 1,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok(Replay { entries, valid_len })
}

/// Append handle plus the length of the log's committed prefix.
#[derive(Debug)]
struct LogWriter {
    file: File,
    len: u64,
}

impl LogWriter {
    /// Appends one record. Bytes past the committed prefix, left by an earlier
    /// failed append, are cut before writing; a failed append is cut back too.
    async fn append(&mut self, line: &[u8]) -> Result<(), CheckpointError> {
        let on_disk = self.file.metadata().await?.len();
        if on_disk != self.len {
            tracing::warn!(
                committed = self.len,
                on_disk,
                "Discarding uncommitted checkpoint bytes"
            );
            self.file.set_len(self.len).await?;
        }

        match self.write(line).await {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.file.set_len(self.len).await {
                    tracing::warn!(error = %rollback, "Failed to roll back partial checkpoint record");
                }
                Err(err.into())
            }
        }
    }

    async fn write(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.sync_data().await
    }
}

impl FileCheckpointStore {
    /// Opens or creates the log at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let Replay { entries, valid_len } = replay(&contents)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if valid_len < contents.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - valid_len,
                "Truncating torn checkpoint tail"
            );
            file.set_len(valid_len as u64).await?;
            file.sync_all().await?;
        }

        let index = DashMap::new();
        for entry in entries {
            index.entry(entry.key.clone()).or_insert(entry);
        }
        tracing::debug!(path = %path.display(), entries = index.len(), "Opened checkpoint log");

        Ok(Self {
            path,
            index,
            writer: Mutex::new(LogWriter {
                file,
                len: valid_len as u64,
            }),
        })
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> Result<Option<CheckpointEntry>, CheckpointError> {
        Ok(self.index.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_if_absent(&self, entry: CheckpointEntry) -> Result<CommitStatus, CheckpointError> {
        let mut writer = self.writer.lock().await;
        if self.index.contains_key(&entry.key) {
            return Ok(CommitStatus::AlreadyPresent);
        }

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        writer.append(line.as_bytes()).await?;

        self.index.insert(entry.key.clone(), entry);
        Ok(CommitStatus::Committed)
    }

    async fn entries_for_run(&self, run_id: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let mut entries: Vec<_> = self
            .index
            .iter()
            .filter(|entry| entry.key().run_id == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.committed_at);
        Ok(entries)
    }
}
