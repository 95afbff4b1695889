//! Test assertions for outcomes and reports.

use crate::core::{Outcome, RunStatus};
use crate::errors::ErrorKind;
use crate::pipeline::PipelineReport;

/// Asserts that the outcome succeeded and returns its value.
#[track_caller]
pub fn assert_succeeded(outcome: &Outcome) -> &serde_json::Value {
    match outcome {
        Outcome::Succeeded { value } => value,
        Outcome::Failed { error } => panic!("Expected success, got failure: {error}"),
    }
}

/// Asserts that the outcome failed with `kind`.
#[track_caller]
pub fn assert_failed_with(outcome: &Outcome, kind: ErrorKind) {
    assert_eq!(
        outcome.error_kind(),
        Some(kind),
        "Expected {kind} failure, got {outcome:?}"
    );
}

/// Asserts the report's status and child counts.
#[track_caller]
pub fn assert_report(report: &PipelineReport, status: RunStatus, successful: usize, failed: usize) {
    assert_eq!(report.status, status, "Unexpected run status");
    assert_eq!(
        (report.summary.successful, report.summary.failed),
        (successful, failed),
        "Unexpected child counts"
    );
    assert_eq!(report.failures.len(), failed, "Failure records do not match count");
}
