//! Lifecycle events emitted by the engine.
//!
//! Every invocation attempt, checkpoint decision and pipeline boundary is
//! reported to an [`EventSink`] in addition to the `tracing` logs. Sinks are
//! passed explicitly to the engine; there is no global sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod types {
    /// An attempt started.
    pub const INVOCATION_STARTED: &str = "invocation.started";
    /// An attempt failed.
    pub const INVOCATION_ATTEMPT_FAILED: &str = "invocation.attempt_failed";
    /// A retry was scheduled after backoff.
    pub const INVOCATION_RETRYING: &str = "invocation.retrying";
    /// The invocation finished with a value.
    pub const INVOCATION_SUCCEEDED: &str = "invocation.succeeded";
    /// The invocation finished with an error.
    pub const INVOCATION_FAILED: &str = "invocation.failed";
    /// A stage output was served from a checkpoint.
    pub const STAGE_CHECKPOINT_HIT: &str = "stage.checkpoint_hit";
    /// A stage output was committed to the checkpoint store.
    pub const STAGE_COMMITTED: &str = "stage.committed";
    /// A pipeline run started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A pipeline run finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
}
