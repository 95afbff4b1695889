//! Pipeline execution.
//!
//! This module provides:
//! - The [`Engine`] that runs registered applications for a run ID
//! - The [`PipelineDriver`] application bodies compose stages through
//! - Run, stage and report records

mod driver;
mod engine;
mod report;
mod run;

#[cfg(test)]
mod integration_tests;

pub use driver::{PipelineDriver, StageAwaitable};
pub use engine::Engine;
pub use report::{FailureRecord, PipelineReport, RunSummary};
pub use run::{PipelineRun, StageKind, StageRecord, StageSource};
