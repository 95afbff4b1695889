//! The result handed back for a finished run.

use super::run::{PipelineRun, StageRecord};
use crate::core::{Outcome, RunStatus};
use crate::errors::{ErrorKind, InvocationError};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// Record of one failed child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage the child belonged to.
    pub stage_id: String,
    /// Slot index for map elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Function name.
    pub function: String,
    /// Error kind.
    pub kind: ErrorKind,
    /// Error message.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: Timestamp,
}

impl FailureRecord {
    /// Creates a failure record.
    #[must_use]
    pub fn new(stage_id: impl Into<String>, function: impl Into<String>, error: &InvocationError) -> Self {
        Self {
            stage_id: stage_id.into(),
            index: None,
            function: function.into(),
            kind: error.kind(),
            error: error.to_string(),
            timestamp: now_utc(),
        }
    }

    /// Sets the slot index.
    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Returns true if retrying later might succeed.
    #[must_use]
    pub fn recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::Timeout)
    }
}

/// Child outcome counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// All children.
    pub total: usize,
    /// Successful children.
    pub successful: usize,
    /// Failed children.
    pub failed: usize,
}

impl RunSummary {
    /// Creates a summary from counts.
    #[must_use]
    pub fn new(successful: usize, failed: usize) -> Self {
        Self {
            total: successful + failed,
            successful,
            failed,
        }
    }

    /// Fraction of children that succeeded; 1.0 for a run with none.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total as f64
    }
}

/// Final report of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Run ID.
    pub run_id: String,
    /// Application name.
    pub application: String,
    /// Aggregate status.
    pub status: RunStatus,
    /// What the application body returned.
    pub output: Outcome,
    /// Child outcome counts.
    pub summary: RunSummary,
    /// Every failed child.
    pub failures: Vec<FailureRecord>,
    /// Stages in the order they started.
    pub stages: Vec<StageRecord>,
    /// When the run began.
    pub started_at: Timestamp,
    /// When the run finished.
    pub ended_at: Timestamp,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl PipelineReport {
    pub(crate) fn new(
        run: PipelineRun,
        output: Outcome,
        failures: Vec<FailureRecord>,
        duration_ms: f64,
    ) -> Self {
        let (successful, failed) = run.child_counts();
        Self {
            run_id: run.run_id,
            application: run.application,
            status: run.status,
            output,
            summary: RunSummary::new(successful, failed),
            failures,
            stages: run.stages,
            started_at: run.started_at,
            ended_at: run.ended_at.unwrap_or_else(now_utc),
            duration_ms,
        }
    }

    /// Returns true if the run succeeded outright.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Returns true if any child failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns the first stage with `stage_id`.
    #[must_use]
    pub fn stage(&self, stage_id: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|stage| stage.stage_id == stage_id)
    }

    /// Returns the output value, if the body succeeded.
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.output.value()
    }

    /// Serialises the report.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
