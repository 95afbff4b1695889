//! Run and stage bookkeeping.

use crate::core::{Outcome, RunStatus};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// What a stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// One call of one function.
    Call,
    /// One function over many inputs.
    Map,
    /// A spawned future.
    Future,
    /// A fold over earlier outcomes.
    Reduce,
}

impl StageKind {
    /// Returns true if the stage's outcomes count towards the run summary.
    ///
    /// Reduce steps are not children of the run.
    #[must_use]
    pub fn counts_as_children(&self) -> bool {
        !matches!(self, Self::Reduce)
    }
}

/// Where a stage's outcomes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageSource {
    /// Every outcome was computed in this run.
    #[default]
    Executed,
    /// Every outcome was read from a checkpoint.
    Checkpoint,
    /// Some of each.
    Mixed,
}

/// Record of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Caller-supplied stage ID.
    pub stage_id: String,
    /// Stage kind.
    pub kind: StageKind,
    /// Function name, if the stage called one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Successful outcomes.
    pub successful: usize,
    /// Failed outcomes.
    pub failed: usize,
    /// Outcomes served from checkpoints.
    pub checkpoint_hits: usize,
    /// Failed inputs passed through without a call.
    pub passed_through: usize,
    /// Where the outcomes came from.
    pub source: StageSource,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// When the stage began.
    pub started_at: Timestamp,
}

impl StageRecord {
    /// Opens a record.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, kind: StageKind, function: Option<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            kind,
            function,
            successful: 0,
            failed: 0,
            checkpoint_hits: 0,
            passed_through: 0,
            source: StageSource::Executed,
            duration_ms: 0.0,
            started_at: now_utc(),
        }
    }

    /// Counts one outcome.
    pub fn tally(&mut self, outcome: &Outcome, from_checkpoint: bool) {
        if outcome.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        if from_checkpoint {
            self.checkpoint_hits += 1;
        }
    }

    /// Counts one tombstone passed through.
    pub fn pass_through(&mut self) {
        self.passed_through += 1;
    }

    /// Outcomes counted by [`tally`](Self::tally).
    #[must_use]
    pub fn total(&self) -> usize {
        self.successful + self.failed
    }

    /// Closes the record.
    pub fn finish(&mut self, duration_ms: f64) {
        self.duration_ms = duration_ms;
        self.source = match self.checkpoint_hits {
            0 => StageSource::Executed,
            hits if hits == self.total() => StageSource::Checkpoint,
            _ => StageSource::Mixed,
        };
    }
}

/// State of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run ID, stable across resumes.
    pub run_id: String,
    /// Application name.
    pub application: String,
    /// Aggregate status.
    pub status: RunStatus,
    /// Stages in the order they started.
    pub stages: Vec<StageRecord>,
    /// When the run began.
    pub started_at: Timestamp,
    /// When the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
}

impl PipelineRun {
    /// Starts a run.
    #[must_use]
    pub fn new(run_id: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            application: application.into(),
            status: RunStatus::Running,
            stages: Vec::new(),
            started_at: now_utc(),
            ended_at: None,
        }
    }

    /// Appends a stage and returns its position.
    pub fn open_stage(&mut self, stage: StageRecord) -> usize {
        self.stages.push(stage);
        self.stages.len() - 1
    }

    /// Returns `(successful, failed)` over every child outcome.
    #[must_use]
    pub fn child_counts(&self) -> (usize, usize) {
        self.stages
            .iter()
            .filter(|stage| stage.kind.counts_as_children())
            .fold((0, 0), |(ok, failed), stage| {
                (ok + stage.successful, failed + stage.failed)
            })
    }

    /// Sets the final status. A failed body fails the run.
    pub fn complete(&mut self, body_succeeded: bool) {
        let (successful, failed) = self.child_counts();
        self.status = if body_succeeded {
            RunStatus::from_counts(successful, failed)
        } else {
            RunStatus::Failed
        };
        self.ended_at = Some(now_utc());
    }
}
