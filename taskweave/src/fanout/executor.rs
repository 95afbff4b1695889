//! Bounded-concurrency fan-out of one function over many inputs.

use crate::core::{Invocation, InvocationKey, Outcome, SharedInvocation};
use crate::errors::InvocationError;
use crate::invoker::Invoker;
use crate::registry::FunctionDefinition;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default cap on in-flight invocations.
pub const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// Runs one invocation per input with a shared concurrency limit.
///
/// The semaphore is shared by every map started from clones of the same
/// executor, so the limit holds engine-wide. A failed element only affects
/// its own slot.
#[derive(Debug, Clone)]
pub struct MapExecutor {
    invoker: Invoker,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl MapExecutor {
    /// Creates an executor allowing `max_concurrency` invocations at once.
    #[must_use]
    pub fn new(invoker: Invoker, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            invoker,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Returns the invoker used for each element.
    #[must_use]
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Starts every element and yields `(index, outcome)` in completion order.
    ///
    /// Elements are spawned immediately; dropping the stream does not cancel
    /// them.
    pub fn stream(
        &self,
        definition: Arc<FunctionDefinition>,
        key: &InvocationKey,
        inputs: Vec<serde_json::Value>,
    ) -> BoxStream<'static, (usize, Outcome)> {
        self.stream_indexed(definition, key, inputs.into_iter().enumerate().collect())
    }

    /// Like [`stream`](Self::stream) with caller-chosen slot indices.
    pub fn stream_indexed(
        &self,
        definition: Arc<FunctionDefinition>,
        key: &InvocationKey,
        items: Vec<(usize, serde_json::Value)>,
    ) -> BoxStream<'static, (usize, Outcome)> {
        tracing::debug!(
            stage = %key,
            function = %definition.name(),
            elements = items.len(),
            max_concurrency = self.max_concurrency,
            "Fanning out"
        );

        let tasks: FuturesUnordered<BoxFuture<'static, (usize, Outcome)>> = items
            .into_iter()
            .map(|(index, input)| {
                let handle = self.spawn_element(Arc::clone(&definition), key.slot(index), input);
                async move {
                    let outcome = handle.await.unwrap_or_else(|err| {
                        Outcome::failure(InvocationError::platform(format!(
                            "map element task aborted: {err}"
                        )))
                    });
                    (index, outcome)
                }
                .boxed()
            })
            .collect();

        tasks.boxed()
    }

    fn spawn_element(
        &self,
        definition: Arc<FunctionDefinition>,
        key: InvocationKey,
        input: serde_json::Value,
    ) -> tokio::task::JoinHandle<Outcome> {
        let executor = self.clone();
        tokio::spawn(async move {
            let record = Invocation::new(key, definition.name(), input).shared();
            executor.execute_bounded(&definition, &record).await
        })
    }

    /// Runs one invocation once a concurrency permit is free.
    pub(crate) async fn execute_bounded(
        &self,
        definition: &FunctionDefinition,
        record: &SharedInvocation,
    ) -> Outcome {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Outcome::failure(InvocationError::platform("concurrency limiter closed"));
        };
        self.invoker.execute(definition, record).await
    }

    /// Runs every element and returns outcomes in input order.
    ///
    /// The result always has one slot per input.
    pub async fn map(
        &self,
        definition: Arc<FunctionDefinition>,
        key: &InvocationKey,
        inputs: Vec<serde_json::Value>,
    ) -> Vec<Outcome> {
        let len = inputs.len();
        let mut slots: Vec<Option<Outcome>> = vec![None; len];
        let mut stream = self.stream(definition, key, inputs);
        while let Some((index, outcome)) = stream.next().await {
            slots[index] = Some(outcome);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Outcome::failure(InvocationError::platform("map slot produced no outcome"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{AsyncFnComputation, CallContext, FnComputation};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key() -> InvocationKey {
        InvocationKey::new("run-1", "map")
    }

    /// Sleeps longer for lower inputs so completion order is reversed.
    fn reversed_delay() -> Arc<FunctionDefinition> {
        Arc::new(FunctionDefinition::new(
            "delayed",
            AsyncFnComputation::new("delayed", |input: serde_json::Value, _ctx: CallContext| async move {
                let n = input.as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(60 - n * 15)).await;
                Ok::<_, InvocationError>(json!(n * 10))
            }),
        ))
    }

    #[tokio::test]
    async fn test_map_preserves_input_order() {
        let executor = MapExecutor::new(Invoker::default(), 8);
        let outcomes = executor
            .map(reversed_delay(), &key(), vec![json!(0), json!(1), json!(2), json!(3)])
            .await;

        let values: Vec<_> = outcomes.iter().map(|o| o.value().cloned()).collect();
        assert_eq!(
            values,
            vec![Some(json!(0)), Some(json!(10)), Some(json!(20)), Some(json!(30))]
        );
    }

    #[tokio::test]
    async fn test_stream_yields_completion_order() {
        let executor = MapExecutor::new(Invoker::default(), 8);
        let order: Vec<usize> = executor
            .stream(reversed_delay(), &key(), vec![json!(0), json!(1), json!(2), json!(3)])
            .map(|(index, _)| index)
            .collect()
            .await;

        assert_eq!(order, vec![3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_failures_isolated_to_slot() {
        let def = Arc::new(FunctionDefinition::new(
            "picky",
            FnComputation::new("picky", |input| {
                if input == json!("bad") {
                    Err(InvocationError::validation("bad input"))
                } else {
                    Ok(input)
                }
            }),
        ));

        let executor = MapExecutor::new(Invoker::default(), 2);
        let outcomes = executor
            .map(def, &key(), vec![json!("a"), json!("bad"), json!("c")])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_failure());
        assert_eq!(outcomes[2].value(), Some(&json!("c")));
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let def = Arc::new(FunctionDefinition::new(
            "tracked",
            AsyncFnComputation::new("tracked", move |input, _ctx| {
                let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, InvocationError>(input)
                }
            }),
        ));

        let executor = MapExecutor::new(Invoker::default(), 3);
        let inputs = (0..12).map(|i| json!(i)).collect();
        let outcomes = executor.map(def, &key(), inputs).await;

        assert_eq!(outcomes.len(), 12);
        assert!(outcomes.iter().all(Outcome::is_success));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_map() {
        let executor = MapExecutor::new(Invoker::default(), 4);
        assert!(executor.map(reversed_delay(), &key(), Vec::new()).await.is_empty());
        assert_eq!(MapExecutor::new(Invoker::default(), 0).max_concurrency(), 1);
    }
}
