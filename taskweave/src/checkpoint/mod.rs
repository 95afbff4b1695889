//! Durable stage outputs keyed by run, stage and input fingerprint.
//!
//! Only successful outputs are committed, so a resumed run re-executes
//! exactly the work that failed or never finished. Commits are
//! insert-if-absent; a second commit under the same key changes nothing.
//!
//! Functions must be idempotent or at-least-once safe: a crash between an
//! invocation finishing and its commit re-executes it on resume.

mod file;
mod fingerprint;
mod memory;
mod store;

pub use file::FileCheckpointStore;
pub use fingerprint::{canonical_json, fingerprint};
pub use memory::InMemoryCheckpointStore;
pub use store::{CheckpointEntry, CheckpointKey, CheckpointStore, CommitStatus};

#[cfg(test)]
pub use store::MockCheckpointStore;

use crate::errors::CheckpointError;
use crate::events::{types, EventSink, NoOpEventSink};
use serde_json::json;
use std::sync::Arc;

/// Looks up and commits stage outputs, reporting both as events.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager").finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Returns the committed output for the key, if any.
    pub async fn lookup(
        &self,
        run_id: &str,
        stage_id: &str,
        fingerprint: &str,
    ) -> Result<Option<serde_json::Value>, CheckpointError> {
        let key = CheckpointKey::new(run_id, stage_id, fingerprint);
        let Some(entry) = self.store.get(&key).await? else {
            return Ok(None);
        };

        tracing::debug!(checkpoint = %key, "Checkpoint hit");
        self.events
            .emit(
                types::STAGE_CHECKPOINT_HIT,
                Some(json!({
                    "run_id": run_id,
                    "stage_id": stage_id,
                    "fingerprint": fingerprint,
                    "committed_at": crate::utils::format_timestamp(&entry.committed_at),
                })),
            )
            .await;
        Ok(Some(entry.output))
    }

    /// Commits `output` unless the key already has one.
    pub async fn commit(
        &self,
        run_id: &str,
        stage_id: &str,
        fingerprint: &str,
        output: serde_json::Value,
    ) -> Result<CommitStatus, CheckpointError> {
        let key = CheckpointKey::new(run_id, stage_id, fingerprint);
        let status = self
            .store
            .put_if_absent(CheckpointEntry::new(key.clone(), output))
            .await?;

        match status {
            CommitStatus::Committed => {
                tracing::debug!(checkpoint = %key, "Committed checkpoint");
                self.events
                    .emit(
                        types::STAGE_COMMITTED,
                        Some(json!({
                            "run_id": run_id,
                            "stage_id": stage_id,
                            "fingerprint": fingerprint,
                        })),
                    )
                    .await;
            }
            CommitStatus::AlreadyPresent => {
                tracing::debug!(checkpoint = %key, "Checkpoint already present");
            }
        }
        Ok(status)
    }

    /// Returns every entry committed for a run.
    pub async fn entries_for_run(&self, run_id: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        self.store.entries_for_run(run_id).await
    }
}
