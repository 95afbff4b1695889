//! Single-invocation execution with timeout and retry.

use super::retry::{should_retry, RetryDecision, RetryPolicy, RetryState};
use crate::core::{Invocation, InvocationKey, Outcome, SharedInvocation};
use crate::errors::InvocationError;
use crate::events::{types, EventSink, NoOpEventSink};
use crate::functions::CallContext;
use crate::registry::{FunctionDefinition, DEFAULT_TIMEOUT};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Runs one function on one input until it reaches a terminal outcome.
///
/// Each attempt runs under the definition timeout. When the timeout fires
/// the attempt future is dropped, which frees its concurrency slot. A panic
/// inside a computation is caught and recorded as a transient failure.
#[derive(Clone)]
pub struct Invoker {
    events: Arc<dyn EventSink>,
    default_timeout: Duration,
    default_retry: RetryPolicy,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEventSink))
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("default_timeout", &self.default_timeout)
            .field("default_retry", &self.default_retry)
            .finish_non_exhaustive()
    }
}

impl Invoker {
    /// Creates an invoker that reports to `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            events,
            default_timeout: DEFAULT_TIMEOUT,
            default_retry: RetryPolicy::default(),
        }
    }

    /// Sets the timeout used when a definition declares none.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the retry policy used when a definition declares none.
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Returns the effective timeout for a definition.
    #[must_use]
    pub fn timeout_for(&self, definition: &FunctionDefinition) -> Duration {
        definition.declared_timeout().unwrap_or(self.default_timeout)
    }

    /// Returns the effective retry policy for a definition.
    #[must_use]
    pub fn retry_policy_for(&self, definition: &FunctionDefinition) -> RetryPolicy {
        definition
            .declared_retries()
            .cloned()
            .unwrap_or_else(|| self.default_retry.clone())
    }

    /// Creates an invocation record and drives it to completion.
    pub async fn invoke(
        &self,
        definition: &FunctionDefinition,
        key: InvocationKey,
        input: serde_json::Value,
    ) -> Invocation {
        let record = Invocation::new(key, definition.name(), input).shared();
        self.execute(definition, &record).await;
        let finished = record.read().clone();
        finished
    }

    /// Drives a pending invocation record to a terminal outcome.
    ///
    /// The record is updated after every attempt so observers holding the
    /// same [`SharedInvocation`] can inspect progress.
    pub async fn execute(&self, definition: &FunctionDefinition, record: &SharedInvocation) -> Outcome {
        let (key, input) = {
            let guard = record.read();
            (guard.key().clone(), guard.input().clone())
        };
        let timeout = self.timeout_for(definition);
        let policy = self.retry_policy_for(definition);
        let mut state = RetryState::new();

        loop {
            let begun = record.write().begin_attempt();
            let attempt = match begun {
                Ok(attempt) => attempt,
                Err(err) => {
                    tracing::error!(invocation = %key, error = %err, "Invocation record rejected attempt");
                    return Outcome::failure(InvocationError::platform(err.to_string()));
                }
            };

            tracing::debug!(
                invocation = %key,
                function = %definition.name(),
                attempt,
                "Invocation attempt started"
            );
            self.events
                .emit(
                    types::INVOCATION_STARTED,
                    Some(json!({
                        "invocation": key.to_string(),
                        "function": definition.name(),
                        "attempt": attempt,
                    })),
                )
                .await;

            let ctx = CallContext {
                run_id: key.run_id.clone(),
                stage_id: key.stage_id.clone(),
                function: definition.name().to_string(),
                attempt,
                secrets: definition.secrets().to_vec(),
            };

            let error = match run_attempt(definition, input.clone(), &ctx, timeout).await {
                Ok(value) => {
                    let committed = record.write().succeed(value.clone());
                    if let Err(err) = committed {
                        tracing::error!(invocation = %key, error = %err, "Failed to record success");
                    }
                    tracing::debug!(invocation = %key, attempt, "Invocation succeeded");
                    self.events
                        .emit(
                            types::INVOCATION_SUCCEEDED,
                            Some(json!({"invocation": key.to_string(), "attempts": attempt})),
                        )
                        .await;
                    return Outcome::success(value);
                }
                Err(error) => error,
            };

            tracing::warn!(
                invocation = %key,
                attempt,
                kind = %error.kind(),
                error = %error,
                "Invocation attempt failed"
            );
            self.events
                .emit(
                    types::INVOCATION_ATTEMPT_FAILED,
                    Some(json!({
                        "invocation": key.to_string(),
                        "attempt": attempt,
                        "error": error.to_dict(),
                    })),
                )
                .await;

            match should_retry(&mut state, &policy, &error) {
                RetryDecision::Retry(delay) => {
                    let scheduled = record.write().schedule_retry(error);
                    if let Err(err) = scheduled {
                        tracing::error!(invocation = %key, error = %err, "Failed to record retry");
                    }
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    tracing::debug!(invocation = %key, attempt, delay_ms, "Retrying after error");
                    self.events
                        .emit(
                            types::INVOCATION_RETRYING,
                            Some(json!({
                                "invocation": key.to_string(),
                                "next_attempt": attempt + 1,
                                "delay_ms": delay_ms,
                            })),
                        )
                        .await;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    let failed = record.write().fail(error.clone());
                    if let Err(err) = failed {
                        tracing::error!(invocation = %key, error = %err, "Failed to record failure");
                    }
                    tracing::info!(
                        invocation = %key,
                        attempts = attempt,
                        kind = %error.kind(),
                        "Invocation failed"
                    );
                    self.events
                        .emit(
                            types::INVOCATION_FAILED,
                            Some(json!({
                                "invocation": key.to_string(),
                                "attempts": attempt,
                                "error": error.to_dict(),
                            })),
                        )
                        .await;
                    return Outcome::failure(error);
                }
            }
        }
    }
}

async fn run_attempt(
    definition: &FunctionDefinition,
    input: serde_json::Value,
    ctx: &CallContext,
    timeout: Duration,
) -> Result<serde_json::Value, InvocationError> {
    let call = AssertUnwindSafe(definition.computation().call(input, ctx)).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(InvocationError::timeout(timeout)),
        Ok(Err(panic)) => Err(InvocationError::transient(format!(
            "computation panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Ok(Ok(result)) => result,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
