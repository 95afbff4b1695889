//! Application entry points.

use crate::errors::InvocationError;
use crate::pipeline::PipelineDriver;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// A named pipeline body that the engine can run for a given run ID.
///
/// The body composes functions through the [`PipelineDriver`]. Returning `Err`
/// marks the whole run as failed; failed children alone never do.
#[async_trait]
pub trait Application: Send + Sync {
    /// Returns the application name.
    fn name(&self) -> &str;

    /// Runs the pipeline body.
    async fn run(
        &self,
        driver: &PipelineDriver,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, InvocationError>;
}

/// An application backed by an async closure.
///
/// The closure receives its own handle to the driver.
pub struct FnApplication<F, Fut>
where
    F: Fn(PipelineDriver, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    name: String,
    body: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnApplication<F, Fut>
where
    F: Fn(PipelineDriver, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    /// Creates a closure-backed application.
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> Application for FnApplication<F, Fut>
where
    F: Fn(PipelineDriver, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        driver: &PipelineDriver,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, InvocationError> {
        (self.body)(driver.clone(), input).await
    }
}

impl<F, Fut> std::fmt::Debug for FnApplication<F, Fut>
where
    F: Fn(PipelineDriver, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, InvocationError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnApplication")
            .field("name", &self.name)
            .finish()
    }
}
