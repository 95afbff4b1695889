//! Checkpoint entries and the storage trait.

use crate::errors::CheckpointError;
use crate::utils::{now_utc, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one committed output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// The pipeline run ID.
    pub run_id: String,
    /// The stage ID.
    pub stage_id: String,
    /// Fingerprint of the stage input.
    pub fingerprint: String,
}

impl CheckpointKey {
    /// Creates a key.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        stage_id: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage_id: stage_id.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.run_id, self.stage_id, self.fingerprint)
    }
}

/// A committed stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// The key this output was committed under.
    #[serde(flatten)]
    pub key: CheckpointKey,
    /// The output value.
    pub output: serde_json::Value,
    /// When the entry was committed.
    pub committed_at: Timestamp,
}

impl CheckpointEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(key: CheckpointKey, output: serde_json::Value) -> Self {
        Self {
            key,
            output,
            committed_at: now_utc(),
        }
    }
}

/// Result of an insert-if-absent commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    /// The entry was written.
    Committed,
    /// An entry already existed under the key; nothing was written.
    AlreadyPresent,
}

/// Durable storage for checkpoint entries.
///
/// Entries are append-only. A second commit under an existing key must leave
/// the first entry untouched and report [`CommitStatus::AlreadyPresent`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the entry under `key`, if any.
    async fn get(&self, key: &CheckpointKey) -> Result<Option<CheckpointEntry>, CheckpointError>;

    /// Writes `entry` unless its key is already present.
    ///
    /// Once this returns `Committed` the entry survives a crash.
    async fn put_if_absent(&self, entry: CheckpointEntry) -> Result<CommitStatus, CheckpointError>;

    /// Returns every entry for a run, oldest first.
    async fn entries_for_run(&self, run_id: &str) -> Result<Vec<CheckpointEntry>, CheckpointError>;
}
