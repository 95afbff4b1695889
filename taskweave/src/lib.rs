//! # Taskweave
//!
//! A durable, concurrent task-orchestration core.
//!
//! Application authors register small units of work ("functions") with
//! resource, retry and timeout metadata, then compose them into pipelines:
//!
//! - **Calls**: one function on one input, with timeout and retry
//! - **Maps**: bounded-concurrency fan-out, results placed by input index
//! - **Reduces**: deterministic in-order folds over earlier outcomes
//! - **Futures**: explicit `spawn` handles and `wait(ALL | FIRST)`
//! - **Checkpoints**: successful outputs are committed per stage, so
//!   re-running a run ID re-executes only what is missing
//!
//! Failed invocations are data ([`Outcome::Failed`](core::Outcome)), never
//! errors: one bad element does not sink its map.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskweave::prelude::*;
//! use serde_json::{json, Value};
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register(
//!     FunctionDefinition::new("fetch_file", FetchFile)
//!         .with_retries(RetryPolicy::retries(2)),
//! )?;
//! registry.register_application(FnApplication::new(
//!     "scraper",
//!     |driver: PipelineDriver, input: Value| async move {
//!         let pages = driver.map("fetch", "fetch_file", urls(&input)).await;
//!         driver.reduce("summarize", &summarize(), &pages, json!({})).await.into_result()
//!     },
//! ))?;
//!
//! let engine = Engine::from_config(registry, EngineConfig::from_env()?).await?;
//! let report = engine.run("scraper", "run-2024-06-01", json!({"urls": urls})).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod functions;
pub mod invoker;
pub mod observability;
pub mod pipeline;
pub mod reduce;
pub mod registry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{
        CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    };
    pub use crate::config::{CheckpointConfig, EngineConfig, LogConfig};
    pub use crate::coordinator::{InvocationFuture, MapFuture, WaitPolicy, WaitSet};
    pub use crate::core::{InvocationState, Outcome, RunStatus};
    pub use crate::errors::{
        ErrorKind, InvocationError, RegistryError, TaskweaveError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::functions::{AsyncFnComputation, CallContext, Computation, FnComputation};
    pub use crate::invoker::{BackoffStrategy, JitterStrategy, RetryPolicy};
    pub use crate::observability::init_logging;
    pub use crate::pipeline::{Engine, PipelineDriver, PipelineReport};
    pub use crate::reduce::Reducer;
    pub use crate::registry::{
        Application, FnApplication, FunctionDefinition, FunctionRegistry, ImageDescriptor,
        ResourceSpec,
    };
}
