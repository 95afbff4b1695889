//! Futures over invocations and waiting on them.
//!
//! [`Coordinator::start`] spawns an invocation immediately and hands back an
//! [`InvocationFuture`]. [`Coordinator::awaitable`] defers that step until
//! [`Awaitable::run`], which consumes the awaitable so it can only start
//! once. [`wait`] suspends the caller over a set of futures without
//! cancelling any of them.

mod future;
mod wait;

pub use future::TaskFuture;
pub use wait::{wait, WaitPolicy, WaitSet};

use crate::core::{Invocation, InvocationKey, Outcome};
use crate::fanout::MapExecutor;
use crate::registry::FunctionDefinition;
use std::sync::Arc;

/// Handle over a single invocation.
pub type InvocationFuture = TaskFuture<Outcome>;

/// Composite handle over a whole map; resolves to one outcome per input.
pub type MapFuture = TaskFuture<Vec<Outcome>>;

/// Starts invocations and maps as futures.
#[derive(Debug, Clone)]
pub struct Coordinator {
    executor: MapExecutor,
}

impl Coordinator {
    /// Creates a coordinator over a map executor and its invoker.
    #[must_use]
    pub fn new(executor: MapExecutor) -> Self {
        Self { executor }
    }

    /// Spawns an invocation now.
    pub fn start(
        &self,
        definition: Arc<FunctionDefinition>,
        key: InvocationKey,
        input: serde_json::Value,
    ) -> InvocationFuture {
        let record = Invocation::new(key.clone(), definition.name(), input).shared();
        let executor = self.executor.clone();
        let task_record = Arc::clone(&record);
        tracing::debug!(invocation = %key, function = %definition.name(), "Starting future");
        TaskFuture::spawn(key.to_string(), Some(record), async move {
            executor.execute_bounded(&definition, &task_record).await
        })
    }

    /// Prepares an invocation without starting it.
    #[must_use]
    pub fn awaitable(
        &self,
        definition: Arc<FunctionDefinition>,
        key: InvocationKey,
        input: serde_json::Value,
    ) -> Awaitable {
        Awaitable {
            coordinator: self.clone(),
            definition,
            key,
            input,
        }
    }

    /// Spawns a whole map as one future.
    pub fn start_map(
        &self,
        definition: Arc<FunctionDefinition>,
        key: InvocationKey,
        inputs: Vec<serde_json::Value>,
    ) -> MapFuture {
        let executor = self.executor.clone();
        let label = key.to_string();
        TaskFuture::spawn(label, None, async move { executor.map(definition, &key, inputs).await })
    }
}

/// A deferred invocation. Starting it consumes it.
#[derive(Debug)]
#[must_use = "an awaitable does nothing until `run` is called"]
pub struct Awaitable {
    coordinator: Coordinator,
    definition: Arc<FunctionDefinition>,
    key: InvocationKey,
    input: serde_json::Value,
}

impl Awaitable {
    /// Returns the key the invocation will run under.
    pub fn key(&self) -> &InvocationKey {
        &self.key
    }

    /// Starts the invocation.
    pub fn run(self) -> InvocationFuture {
        self.coordinator.start(self.definition, self.key, self.input)
    }
}
