//! Mock computations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::InvocationError;
use crate::functions::{CallContext, Computation};

type Body = Box<dyn Fn(Value) -> Result<Value, InvocationError> + Send + Sync>;

/// A computation that counts calls and records inputs.
pub struct CountingComputation {
    body: Body,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl CountingComputation {
    /// Wraps a synchronous body.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(Value) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self {
            body: Box::new(body),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns every input seen, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.inputs.lock().clear();
    }
}

impl std::fmt::Debug for CountingComputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingComputation")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Computation for CountingComputation {
    async fn call(&self, input: Value, _ctx: &CallContext) -> Result<Value, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());
        (self.body)(input)
    }
}

/// A computation that replays a script of results, one per attempt.
///
/// Once the script runs out, the input is echoed back.
#[derive(Debug, Default)]
pub struct ScriptedComputation {
    script: Mutex<VecDeque<Result<Value, InvocationError>>>,
}

impl ScriptedComputation {
    /// Creates a computation from a script.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<Value, InvocationError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Returns the number of scripted results not yet used.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl Computation for ScriptedComputation {
    async fn call(&self, input: Value, _ctx: &CallContext) -> Result<Value, InvocationError> {
        let next = self.script.lock().pop_front();
        next.unwrap_or(Ok(input))
    }
}

/// Fails with a transient error for the first `failures` attempts of every
/// call, then echoes its input.
#[derive(Debug)]
pub struct FlakyComputation {
    failures: u32,
    attempts: AtomicUsize,
}

impl FlakyComputation {
    /// Creates a computation that recovers on attempt `failures + 1`.
    #[must_use]
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns the number of attempts made across all calls.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Computation for FlakyComputation {
    async fn call(&self, input: Value, ctx: &CallContext) -> Result<Value, InvocationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if ctx.attempt <= self.failures {
            return Err(InvocationError::transient(format!(
                "flaky failure on attempt {}",
                ctx.attempt
            )));
        }
        Ok(input)
    }
}

/// Always fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingComputation {
    error: InvocationError,
}

impl FailingComputation {
    /// Creates a computation that fails with `error`.
    #[must_use]
    pub fn new(error: InvocationError) -> Self {
        Self { error }
    }

    /// Creates a computation that fails with a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(InvocationError::transient(message))
    }
}

#[async_trait]
impl Computation for FailingComputation {
    async fn call(&self, _input: Value, _ctx: &CallContext) -> Result<Value, InvocationError> {
        Err(self.error.clone())
    }
}

/// Sleeps, then echoes its input.
///
/// An input object with a `delay_ms` field overrides the default delay.
#[derive(Debug, Clone, Copy)]
pub struct SlowComputation {
    delay: Duration,
}

impl SlowComputation {
    /// Creates a computation that sleeps for `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Computation for SlowComputation {
    async fn call(&self, input: Value, _ctx: &CallContext) -> Result<Value, InvocationError> {
        let delay = input
            .get("delay_ms")
            .and_then(Value::as_u64)
            .map_or(self.delay, Duration::from_millis);
        tokio::time::sleep(delay).await;
        Ok(input)
    }
}
