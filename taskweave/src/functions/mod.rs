//! The computation hook supplied by application authors.
//!
//! A computation is the opaque body of a function: it receives one input
//! value and returns a value or an [`InvocationError`]. The engine knows
//! nothing else about it beyond the timeout and retry budget declared on its
//! [`FunctionDefinition`](crate::registry::FunctionDefinition).

use crate::errors::InvocationError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// Per-attempt information passed to a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// The pipeline run ID.
    pub run_id: String,
    /// The stage ID.
    pub stage_id: String,
    /// The function name.
    pub function: String,
    /// One-based attempt number.
    pub attempt: u32,
    /// Secret names declared on the definition, resolved by the substrate.
    pub secrets: Vec<String>,
}

impl CallContext {
    /// Creates a context for the first attempt.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        stage_id: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage_id: stage_id.into(),
            function: function.into(),
            attempt: 1,
            secrets: Vec::new(),
        }
    }

    /// Returns true if this is a retry.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Trait for function bodies.
///
/// Implementations must be idempotent or at-least-once safe: a crash between
/// execution and checkpoint commit re-executes the call on resume.
#[async_trait]
pub trait Computation: Send + Sync + Debug {
    /// Runs one attempt.
    async fn call(
        &self,
        input: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<serde_json::Value, InvocationError>;
}

/// A synchronous closure-based computation.
pub struct FnComputation<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, InvocationError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnComputation<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, InvocationError> + Send + Sync,
{
    /// Creates a new closure-based computation.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnComputation<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, InvocationError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnComputation")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Computation for FnComputation<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, InvocationError> + Send + Sync,
{
    async fn call(
        &self,
        input: serde_json::Value,
        _ctx: &CallContext,
    ) -> Result<serde_json::Value, InvocationError> {
        (self.func)(input)
    }
}

/// An async closure-based computation.
pub struct AsyncFnComputation<F, Fut>
where
    F: Fn(serde_json::Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnComputation<F, Fut>
where
    F: Fn(serde_json::Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    /// Creates a new async closure-based computation.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnComputation<F, Fut>
where
    F: Fn(serde_json::Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnComputation")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Computation for AsyncFnComputation<F, Fut>
where
    F: Fn(serde_json::Value, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    async fn call(
        &self,
        input: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<serde_json::Value, InvocationError> {
        (self.func)(input, ctx.clone()).await
    }
}

/// A computation that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl Computation for Identity {
    async fn call(
        &self,
        input: serde_json::Value,
        _ctx: &CallContext,
    ) -> Result<serde_json::Value, InvocationError> {
        Ok(input)
    }
}
