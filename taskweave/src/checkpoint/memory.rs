//! In-memory checkpoint store.

use super::{CheckpointEntry, CheckpointKey, CheckpointStore, CommitStatus};
use crate::errors::CheckpointError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Checkpoint store backed by a concurrent map. Lost on process exit.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: DashMap<CheckpointKey, CheckpointEntry>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> Result<Option<CheckpointEntry>, CheckpointError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_if_absent(&self, entry: CheckpointEntry) -> Result<CommitStatus, CheckpointError> {
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(_) => Ok(CommitStatus::AlreadyPresent),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(CommitStatus::Committed)
            }
        }
    }

    async fn entries_for_run(&self, run_id: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().run_id == run_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.committed_at);
        Ok(entries)
    }
}
