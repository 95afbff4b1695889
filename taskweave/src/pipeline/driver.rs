//! The handle an application body composes stages through.
//!
//! Every stage consults the checkpoint store before doing any work and
//! commits successful outcomes as they arrive. Checkpoint granularity:
//!
//! - `call` and `spawn`: one entry per stage, keyed by the input fingerprint
//! - `map`: one entry per element, keyed by that element's fingerprint
//! - `reduce`: one entry for the final accumulator
//!
//! Failed outcomes are never committed, so a resumed run retries them.

use super::report::{FailureRecord, PipelineReport};
use super::run::{PipelineRun, StageKind, StageRecord};
use crate::checkpoint::{fingerprint, CheckpointManager};
use crate::coordinator::{self, Coordinator, InvocationFuture, MapFuture, TaskFuture, WaitPolicy, WaitSet};
use crate::core::{Invocation, InvocationKey, Outcome};
use crate::errors::{CheckpointError, InvocationError, TaskweaveError};
use crate::fanout::MapExecutor;
use crate::observability::SpanTimer;
use crate::reduce::{ReduceFolder, Reducer};
use crate::registry::{FunctionDefinition, FunctionRegistry};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One slot of a map stage.
enum Slot {
    Input(Value),
    Tombstone(Outcome),
}

struct DriverInner {
    run_id: String,
    application: String,
    registry: Arc<FunctionRegistry>,
    executor: MapExecutor,
    coordinator: Coordinator,
    checkpoints: CheckpointManager,
    run: Mutex<PipelineRun>,
    failures: Mutex<Vec<FailureRecord>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    fault: Mutex<Option<CheckpointError>>,
}

/// Stage-level API for one pipeline run.
///
/// Cloning is cheap; clones share the run. Stage IDs are supplied by the
/// caller and must be stable across resumes of the same run.
#[derive(Clone)]
pub struct PipelineDriver {
    inner: Arc<DriverInner>,
}

impl std::fmt::Debug for PipelineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDriver")
            .field("run_id", &self.inner.run_id)
            .field("application", &self.inner.application)
            .finish_non_exhaustive()
    }
}

impl PipelineDriver {
    pub(crate) fn new(
        run_id: impl Into<String>,
        application: impl Into<String>,
        registry: Arc<FunctionRegistry>,
        executor: MapExecutor,
        checkpoints: CheckpointManager,
    ) -> Self {
        let run_id = run_id.into();
        let application = application.into();
        let run = PipelineRun::new(run_id.clone(), application.clone());
        Self {
            inner: Arc::new(DriverInner {
                run_id,
                application,
                registry,
                coordinator: Coordinator::new(executor.clone()),
                executor,
                checkpoints,
                run: Mutex::new(run),
                failures: Mutex::new(Vec::new()),
                watchers: Mutex::new(Vec::new()),
                fault: Mutex::new(None),
            }),
        }
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Returns the application name.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.inner.application
    }

    /// Returns a snapshot of the run so far.
    #[must_use]
    pub fn snapshot(&self) -> PipelineRun {
        self.inner.run.lock().clone()
    }

    /// Calls `function` once.
    pub async fn call(&self, stage_id: &str, function: &str, input: Value) -> Outcome {
        let timer = SpanTimer::start(stage_id);
        let mut stage = StageRecord::new(stage_id, StageKind::Call, Some(function.to_string()));
        let fp = fingerprint(&input);

        let (outcome, cached) = match self.lookup(stage_id, &fp).await {
            Some(value) => (Outcome::success(value), true),
            None => {
                let outcome = match self.resolve(function) {
                    Ok(definition) => {
                        let record = Invocation::new(self.key(stage_id), definition.name(), input).shared();
                        self.inner.executor.execute_bounded(&definition, &record).await
                    }
                    Err(failure) => failure,
                };
                self.commit(stage_id, &fp, &outcome).await;
                (outcome, false)
            }
        };

        stage.tally(&outcome, cached);
        self.record_failure(stage_id, None, function, &outcome);
        stage.finish(timer.finish());
        self.inner.run.lock().open_stage(stage);
        outcome
    }

    /// Calls `function` once per input; slot `i` answers input `i`.
    pub async fn map(&self, stage_id: &str, function: &str, inputs: Vec<Value>) -> Vec<Outcome> {
        self.map_slots(stage_id, function, inputs.into_iter().map(Slot::Input).collect())
            .await
    }

    /// Maps over earlier outcomes.
    ///
    /// Successful slots feed their value to `function`; failed slots are
    /// passed through unchanged without a call.
    pub async fn map_outcomes(&self, stage_id: &str, function: &str, items: &[Outcome]) -> Vec<Outcome> {
        let slots = items
            .iter()
            .map(|item| match item {
                Outcome::Succeeded { value } => Slot::Input(value.clone()),
                failed @ Outcome::Failed { .. } => Slot::Tombstone(failed.clone()),
            })
            .collect();
        self.map_slots(stage_id, function, slots).await
    }

    async fn map_slots(&self, stage_id: &str, function: &str, slots: Vec<Slot>) -> Vec<Outcome> {
        let timer = SpanTimer::start(stage_id);
        let mut stage = StageRecord::new(stage_id, StageKind::Map, Some(function.to_string()));
        let len = slots.len();
        let mut results: Vec<Option<Outcome>> = vec![None; len];
        let mut fingerprints: Vec<Option<String>> = vec![None; len];
        let mut pending = Vec::new();

        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Slot::Tombstone(outcome) => {
                    stage.pass_through();
                    results[index] = Some(outcome);
                }
                Slot::Input(input) => {
                    let fp = fingerprint(&input);
                    if let Some(value) = self.lookup(stage_id, &fp).await {
                        let outcome = Outcome::success(value);
                        stage.tally(&outcome, true);
                        results[index] = Some(outcome);
                    } else {
                        fingerprints[index] = Some(fp);
                        pending.push((index, input));
                    }
                }
            }
        }

        tracing::debug!(
            run_id = %self.inner.run_id,
            stage = stage_id,
            function,
            elements = len,
            cached = stage.checkpoint_hits,
            passed_through = stage.passed_through,
            pending = pending.len(),
            "Running map stage"
        );

        if !pending.is_empty() {
            match self.resolve(function) {
                Ok(definition) => {
                    let key = self.key(stage_id);
                    let mut stream = self.inner.executor.stream_indexed(definition, &key, pending);
                    while let Some((index, outcome)) = stream.next().await {
                        if let Some(fp) = &fingerprints[index] {
                            self.commit(stage_id, fp, &outcome).await;
                        }
                        stage.tally(&outcome, false);
                        self.record_failure(stage_id, Some(index), function, &outcome);
                        results[index] = Some(outcome);
                    }
                }
                Err(failure) => {
                    for (index, _) in pending {
                        stage.tally(&failure, false);
                        self.record_failure(stage_id, Some(index), function, &failure);
                        results[index] = Some(failure.clone());
                    }
                }
            }
        }

        stage.finish(timer.finish());
        self.inner.run.lock().open_stage(stage);

        results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Outcome::failure(InvocationError::platform(format!(
                        "map slot {index} produced no outcome"
                    )))
                })
            })
            .collect()
    }

    /// Folds `items` in order with `reducer`.
    pub async fn reduce(&self, stage_id: &str, reducer: &Reducer, items: &[Outcome], initial: Value) -> Outcome {
        let timer = SpanTimer::start(stage_id);
        let function = match reducer {
            Reducer::Local(_) => None,
            Reducer::Function(definition) => Some(definition.name().to_string()),
        };
        let mut stage = StageRecord::new(stage_id, StageKind::Reduce, function);
        let fp = fingerprint(&json!({
            "initial": initial,
            "items": items.iter().map(Outcome::to_json).collect::<Vec<_>>(),
        }));

        let (outcome, cached) = match self.lookup(stage_id, &fp).await {
            Some(value) => (Outcome::success(value), true),
            None => {
                let folder = ReduceFolder::new(self.inner.executor.invoker().clone(), self.key(stage_id));
                let outcome = folder.reduce(reducer, items, initial).await;
                self.commit(stage_id, &fp, &outcome).await;
                (outcome, false)
            }
        };

        if let Some(err) = outcome.error() {
            tracing::warn!(run_id = %self.inner.run_id, stage = stage_id, error = %err, "Reduce failed");
        }
        stage.tally(&outcome, cached);
        stage.finish(timer.finish());
        self.inner.run.lock().open_stage(stage);
        outcome
    }

    /// Folds `items` with a registered reducer function.
    pub async fn reduce_with(&self, stage_id: &str, function: &str, items: &[Outcome], initial: Value) -> Outcome {
        match self.resolve(function) {
            Ok(definition) => {
                self.reduce(stage_id, &Reducer::function(definition), items, initial)
                    .await
            }
            Err(failure) => {
                let mut stage = StageRecord::new(stage_id, StageKind::Reduce, Some(function.to_string()));
                stage.tally(&failure, false);
                stage.finish(0.0);
                self.inner.run.lock().open_stage(stage);
                failure
            }
        }
    }

    /// Starts `function` as a checkpointed future.
    ///
    /// A checkpoint hit returns an already-terminal future. Otherwise the
    /// invocation runs in the background and its outcome is committed when it
    /// settles, whether or not the body ever awaits it.
    pub async fn spawn(&self, stage_id: &str, function: &str, input: Value) -> InvocationFuture {
        let timer = SpanTimer::start(stage_id);
        let key = self.key(stage_id);
        let fp = fingerprint(&input);

        if let Some(value) = self.lookup(stage_id, &fp).await {
            let outcome = Outcome::success(value);
            let mut stage = StageRecord::new(stage_id, StageKind::Future, Some(function.to_string()));
            stage.tally(&outcome, true);
            stage.finish(timer.finish());
            self.inner.run.lock().open_stage(stage);
            return TaskFuture::ready(key.to_string(), outcome);
        }

        let definition = match self.resolve(function) {
            Ok(definition) => definition,
            Err(failure) => {
                let mut stage = StageRecord::new(stage_id, StageKind::Future, Some(function.to_string()));
                stage.tally(&failure, false);
                self.record_failure(stage_id, None, function, &failure);
                stage.finish(timer.finish());
                self.inner.run.lock().open_stage(stage);
                return TaskFuture::ready(key.to_string(), failure);
            }
        };

        let slot = self.inner.run.lock().open_stage(StageRecord::new(
            stage_id,
            StageKind::Future,
            Some(function.to_string()),
        ));
        let future = self.inner.coordinator.start(definition, key, input);

        let watched = future.clone();
        let driver = self.clone();
        let stage_id = stage_id.to_string();
        let function = function.to_string();
        let watcher = tokio::spawn(async move {
            let outcome = watched
                .result()
                .await
                .unwrap_or_else(|err| Outcome::failure(InvocationError::from(err)));
            driver.commit(&stage_id, &fp, &outcome).await;
            driver.record_failure(&stage_id, None, &function, &outcome);
            let duration_ms = timer.finish();
            if let Some(stage) = driver.inner.run.lock().stages.get_mut(slot) {
                stage.tally(&outcome, false);
                stage.finish(duration_ms);
            }
        });
        self.inner.watchers.lock().push(watcher);
        future
    }

    /// Prepares a checkpointed future without starting it.
    pub fn awaitable(&self, stage_id: &str, function: &str, input: Value) -> StageAwaitable {
        StageAwaitable {
            driver: self.clone(),
            stage_id: stage_id.to_string(),
            function: function.to_string(),
            input,
        }
    }

    /// Starts a whole map stage in the background.
    pub fn spawn_map(&self, stage_id: &str, function: &str, inputs: Vec<Value>) -> MapFuture {
        let driver = self.clone();
        let stage = stage_id.to_string();
        let name = function.to_string();
        let future = TaskFuture::spawn(self.key(stage_id).to_string(), None, async move {
            driver.map(&stage, &name, inputs).await
        });

        let watched = future.clone();
        self.inner
            .watchers
            .lock()
            .push(tokio::spawn(async move { watched.settled().await }));
        future
    }

    /// Suspends the body until `policy` is satisfied. Pending futures keep
    /// running.
    pub async fn wait<T>(&self, futures: &[TaskFuture<T>], policy: WaitPolicy) -> Result<WaitSet, TaskweaveError>
    where
        T: Clone + Send + Sync + 'static,
    {
        coordinator::wait(futures, policy).await
    }

    /// Drains background work and builds the report.
    ///
    /// # Errors
    ///
    /// Returns the first checkpoint store fault seen during the run.
    pub(crate) async fn finish(
        &self,
        body: Result<Value, InvocationError>,
        duration: SpanTimer,
    ) -> Result<PipelineReport, TaskweaveError> {
        loop {
            let watchers = std::mem::take(&mut *self.inner.watchers.lock());
            if watchers.is_empty() {
                break;
            }
            for watcher in watchers {
                if let Err(err) = watcher.await {
                    tracing::error!(run_id = %self.inner.run_id, error = %err, "Stage watcher failed");
                }
            }
        }

        if let Some(fault) = self.inner.fault.lock().take() {
            return Err(fault.into());
        }

        let output = Outcome::from(body);
        let run = {
            let mut run = self.inner.run.lock();
            run.complete(output.is_success());
            run.clone()
        };
        let failures = self.inner.failures.lock().clone();
        Ok(PipelineReport::new(run, output, failures, duration.finish()))
    }

    fn key(&self, stage_id: &str) -> InvocationKey {
        InvocationKey::new(self.inner.run_id.clone(), stage_id)
    }

    fn resolve(&self, function: &str) -> Result<Arc<FunctionDefinition>, Outcome> {
        self.inner.registry.lookup(function).map_err(|err| {
            tracing::warn!(run_id = %self.inner.run_id, function, "Unknown function");
            Outcome::failure(InvocationError::platform(err.to_string()))
        })
    }

    async fn lookup(&self, stage_id: &str, fp: &str) -> Option<Value> {
        match self.inner.checkpoints.lookup(&self.inner.run_id, stage_id, fp).await {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(run_id = %self.inner.run_id, stage = stage_id, error = %err, "Checkpoint lookup failed");
                self.record_fault(err);
                None
            }
        }
    }

    async fn commit(&self, stage_id: &str, fp: &str, outcome: &Outcome) {
        let Outcome::Succeeded { value } = outcome else {
            return;
        };
        if let Err(err) = self
            .inner
            .checkpoints
            .commit(&self.inner.run_id, stage_id, fp, value.clone())
            .await
        {
            tracing::error!(run_id = %self.inner.run_id, stage = stage_id, error = %err, "Checkpoint commit failed");
            self.record_fault(err);
        }
    }

    fn record_fault(&self, err: CheckpointError) {
        let mut fault = self.inner.fault.lock();
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    fn record_failure(&self, stage_id: &str, index: Option<usize>, function: &str, outcome: &Outcome) {
        let Some(error) = outcome.error() else {
            return;
        };
        let mut record = FailureRecord::new(stage_id, function, error);
        if let Some(index) = index {
            record = record.with_index(index);
        }
        self.inner.failures.lock().push(record);
    }
}

/// A checkpointed future that has not started.
#[derive(Debug)]
#[must_use = "an awaitable does nothing until `run` is called"]
pub struct StageAwaitable {
    driver: PipelineDriver,
    stage_id: String,
    function: String,
    input: Value,
}

impl StageAwaitable {
    /// Returns the stage ID.
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Starts the future.
    pub async fn run(self) -> InvocationFuture {
        self.driver.spawn(&self.stage_id, &self.function, self.input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
    use crate::errors::ErrorKind;
    use crate::functions::FnComputation;
    use crate::invoker::Invoker;
    use crate::testing::CountingComputation;
    use pretty_assertions::assert_eq;

    fn registry() -> (Arc<FunctionRegistry>, Arc<CountingComputation>) {
        let double = Arc::new(CountingComputation::new(|input| {
            let n = input
                .as_i64()
                .ok_or_else(|| InvocationError::validation("expected integer"))?;
            Ok(json!(n * 2))
        }));
        let mut registry = FunctionRegistry::new();
        registry
            .register(FunctionDefinition::from_arc("double", double.clone()))
            .unwrap();
        registry
            .register(FunctionDefinition::new(
                "sum",
                FnComputation::new("sum", |input| {
                    let acc = input["accumulator"].as_i64().unwrap_or(0);
                    let item = input["item"]["value"].as_i64().unwrap_or(0);
                    Ok(json!(acc + item))
                }),
            ))
            .unwrap();
        (Arc::new(registry), double)
    }

    fn driver_with(store: Arc<InMemoryCheckpointStore>) -> (PipelineDriver, Arc<CountingComputation>) {
        let (registry, double) = registry();
        let executor = MapExecutor::new(Invoker::default(), 4);
        let driver = PipelineDriver::new("run-1", "test", registry, executor, CheckpointManager::new(store));
        (driver, double)
    }

    #[tokio::test]
    async fn test_call_commits_and_resumes() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (driver, double) = driver_with(Arc::clone(&store));
        assert_eq!(driver.call("twice", "double", json!(4)).await, Outcome::success(json!(8)));
        assert_eq!(store.len(), 1);

        let (resumed, again) = driver_with(Arc::clone(&store));
        assert_eq!(resumed.call("twice", "double", json!(4)).await, Outcome::success(json!(8)));
        assert_eq!(double.calls(), 1);
        assert_eq!(again.calls(), 0);
        assert_eq!(resumed.snapshot().stages[0].checkpoint_hits, 1);
    }

    #[tokio::test]
    async fn test_failed_call_is_not_committed() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (driver, _) = driver_with(Arc::clone(&store));
        let outcome = driver.call("twice", "double", json!("x")).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Validation));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_function_is_data() {
        let (driver, _) = driver_with(Arc::new(InMemoryCheckpointStore::new()));
        let outcome = driver.call("missing", "nope", json!(1)).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::TerminalPlatform));

        let mapped = driver.map("missing_map", "nope", vec![json!(1), json!(2)]).await;
        assert_eq!(mapped.len(), 2);
        assert!(mapped.iter().all(Outcome::is_failure));
    }

    #[tokio::test]
    async fn test_map_outcomes_passes_tombstones() {
        let (driver, double) = driver_with(Arc::new(InMemoryCheckpointStore::new()));
        let tombstone = Outcome::failure(InvocationError::transient("reset"));
        let items = vec![Outcome::success(json!(1)), tombstone.clone(), Outcome::success(json!(3))];

        let outcomes = driver.map_outcomes("double", "double", &items).await;
        assert_eq!(
            outcomes,
            vec![Outcome::success(json!(2)), tombstone, Outcome::success(json!(6))]
        );
        assert_eq!(double.calls(), 2);

        let stage = &driver.snapshot().stages[0];
        assert_eq!((stage.successful, stage.failed, stage.passed_through), (2, 0, 1));
    }

    #[tokio::test]
    async fn test_map_resumes_per_element() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (first, _) = driver_with(Arc::clone(&store));
        let outcomes = first.map("double", "double", vec![json!(1), json!("x")]).await;
        assert!(outcomes[0].is_success() && outcomes[1].is_failure());

        let (second, double) = driver_with(Arc::clone(&store));
        second.map("double", "double", vec![json!(1), json!("x")]).await;
        assert_eq!(double.calls(), 1);
        assert_eq!(
            second.snapshot().stages[0].source,
            crate::pipeline::StageSource::Mixed
        );
    }

    #[tokio::test]
    async fn test_reduce_with_function() {
        let (driver, _) = driver_with(Arc::new(InMemoryCheckpointStore::new()));
        let items = vec![Outcome::success(json!(2)), Outcome::success(json!(5))];
        assert_eq!(
            driver.reduce_with("total", "sum", &items, json!(0)).await,
            Outcome::success(json!(7))
        );
        assert_eq!(driver.snapshot().child_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_spawn_commits_without_await() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (driver, _) = driver_with(Arc::clone(&store));
        let _future = driver.spawn("bg", "double", json!(21)).await;

        let report = driver
            .finish(Ok(json!(null)), SpanTimer::start("run"))
            .await
            .unwrap();
        assert_eq!(report.summary.successful, 1);
        assert_eq!(store.entries_for_run("run-1").await.unwrap().len(), 1);

        let (resumed, double) = driver_with(store);
        let future = resumed.awaitable("bg", "double", json!(21)).run().await;
        assert!(future.is_terminal());
        assert_eq!(future.result().await.unwrap(), Outcome::success(json!(42)));
        assert_eq!(double.calls(), 0);
    }
}
