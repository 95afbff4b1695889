//! Runs registered applications.

use super::driver::PipelineDriver;
use super::report::PipelineReport;
use crate::checkpoint::{CheckpointManager, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use crate::config::{CheckpointConfig, EngineConfig};
use crate::errors::{InvocationError, TaskweaveError};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::fanout::MapExecutor;
use crate::invoker::{panic_message, Invoker};
use crate::observability::SpanTimer;
use crate::registry::FunctionRegistry;
use crate::utils::generate_run_id;
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Owns the registry, configuration, checkpoint store and event sink, and
/// runs applications against them.
///
/// The registry is frozen when the engine is built, so dispatch never races
/// with registration.
pub struct Engine {
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
    executor: MapExecutor,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the default configuration and an in-memory
    /// checkpoint store.
    #[must_use]
    pub fn new(registry: FunctionRegistry) -> Self {
        let config = EngineConfig::default();
        let events: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        Self {
            registry: Arc::new(registry),
            executor: Self::build_executor(&config, &events),
            config,
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            events,
        }
    }

    /// Builds an engine from configuration, opening the configured
    /// checkpoint store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the checkpoint
    /// log cannot be opened.
    pub async fn from_config(registry: FunctionRegistry, config: EngineConfig) -> Result<Self, TaskweaveError> {
        config.validate()?;
        let store: Arc<dyn CheckpointStore> = match &config.checkpoint {
            CheckpointConfig::Memory => Arc::new(InMemoryCheckpointStore::new()),
            CheckpointConfig::File { path } => Arc::new(FileCheckpointStore::open(path).await?),
        };
        Ok(Self::new(registry)
            .with_config(config)
            .with_checkpoint_store(store))
    }

    /// Sets the configuration. The checkpoint backend is not reopened; use
    /// [`from_config`](Self::from_config) or
    /// [`with_checkpoint_store`](Self::with_checkpoint_store) for that.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.executor = Self::build_executor(&config, &self.events);
        self.config = config;
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = Self::build_executor(&self.config, &events);
        self.events = events;
        self
    }

    fn build_executor(config: &EngineConfig, events: &Arc<dyn EventSink>) -> MapExecutor {
        let invoker = Invoker::new(Arc::clone(events))
            .with_default_timeout(config.default_timeout())
            .with_default_retry(config.default_retry.clone());
        MapExecutor::new(invoker, config.max_concurrency)
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn checkpoint_store(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Creates a driver for `run_id` without running anything.
    #[must_use]
    pub fn driver(&self, application: &str, run_id: &str) -> PipelineDriver {
        let checkpoints =
            CheckpointManager::new(Arc::clone(&self.checkpoints)).with_event_sink(Arc::clone(&self.events));
        PipelineDriver::new(
            run_id,
            application,
            Arc::clone(&self.registry),
            self.executor.clone(),
            checkpoints,
        )
    }

    /// Runs `application` under `run_id`.
    ///
    /// Re-running a run ID resumes it: committed stages are served from
    /// checkpoints and only the rest execute.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown application or a checkpoint store
    /// fault. Failed children and a failed body are reported, not returned.
    pub async fn run(&self, application: &str, run_id: &str, input: Value) -> Result<PipelineReport, TaskweaveError> {
        let app = self.registry.application(application)?;
        let timer = SpanTimer::start(application);
        let driver = self.driver(application, run_id);

        tracing::info!(run_id, application, "Pipeline started");
        self.events
            .emit(
                types::PIPELINE_STARTED,
                Some(json!({"run_id": run_id, "application": application})),
            )
            .await;

        let body = AssertUnwindSafe(app.run(&driver, input))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(InvocationError::platform(format!(
                    "application panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        if let Err(err) = &body {
            tracing::warn!(run_id, application, error = %err, "Application body failed");
        }

        let report = driver.finish(body, timer).await?;

        tracing::info!(
            run_id,
            application,
            status = %report.status,
            successful = report.summary.successful,
            failed = report.summary.failed,
            duration_ms = report.duration_ms,
            "Pipeline completed"
        );
        self.events
            .emit(
                types::PIPELINE_COMPLETED,
                Some(json!({
                    "run_id": run_id,
                    "application": application,
                    "status": report.status,
                    "successful": report.summary.successful,
                    "failed": report.summary.failed,
                    "duration_ms": report.duration_ms,
                })),
            )
            .await;
        Ok(report)
    }

    /// Runs `application` under a fresh run ID.
    pub async fn run_new(&self, application: &str, input: Value) -> Result<PipelineReport, TaskweaveError> {
        self.run(application, &generate_run_id(), input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::errors::RegistryError;
    use crate::events::CollectingEventSink;
    use crate::functions::Identity;
    use crate::registry::{FnApplication, FunctionDefinition};
    use crate::testing::CountingComputation;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry
            .register(FunctionDefinition::new("echo", Identity))
            .unwrap();
        registry
            .register_application(FnApplication::new("echo_app", |driver: PipelineDriver, input| async move {
                driver.call("echo", "echo", input).await.into_result()
            }))
            .unwrap();
        registry
            .register_application(FnApplication::new("bad_app", |_driver: PipelineDriver, _input| async move {
                Err::<Value, _>(InvocationError::validation("no input"))
            }))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_run_emits_events() {
        let events = Arc::new(CollectingEventSink::new());
        let engine = Engine::new(registry()).with_event_sink(events.clone());

        let report = engine.run("echo_app", "run-1", json!({"a": 1})).await.unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.value(), Some(&json!({"a": 1})));
        assert_eq!(events.count(types::PIPELINE_STARTED), 1);
        assert_eq!(events.count(types::PIPELINE_COMPLETED), 1);
        assert_eq!(events.count(types::STAGE_COMMITTED), 1);
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let engine = Engine::new(registry());
        let err = engine.run("nope", "run-1", json!(null)).await.unwrap_err();
        assert!(matches!(
            err,
            TaskweaveError::Registry(RegistryError::UnknownApplication { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_body_fails_run() {
        let engine = Engine::new(registry());
        let report = engine.run_new("bad_app", json!(null)).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.output.is_failure());
        assert!(report.run_id.starts_with("run_"));
    }

    #[tokio::test]
    async fn test_body_panic_is_reported() {
        let mut registry = FunctionRegistry::new();
        registry
            .register_application(FnApplication::new("boom", |_driver: PipelineDriver, input: Value| async move {
                let missing: Option<Value> = input.get("missing").cloned();
                Ok::<_, InvocationError>(missing.expect("boom"))
            }))
            .unwrap();

        let report = Engine::new(registry).run("boom", "run-1", json!({})).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.output.error().unwrap().to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_from_config_uses_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            max_concurrency: 2,
            checkpoint: CheckpointConfig::File {
                path: dir.path().join("ckpt.jsonl"),
            },
            ..EngineConfig::default()
        };
        let counter = Arc::new(CountingComputation::new(|input| Ok(input)));
        let mut registry = registry();
        registry
            .register(FunctionDefinition::from_arc("count", counter.clone()))
            .unwrap();

        let engine = Engine::from_config(registry, config).await.unwrap();
        assert_eq!(engine.config().max_concurrency, 2);

        let driver = engine.driver("adhoc", "run-9");
        driver.call("once", "count", json!(1)).await;
        assert_eq!(
            engine.checkpoint_store().entries_for_run("run-9").await.unwrap().len(),
            1
        );
        assert!(dir.path().join("ckpt.jsonl").exists());
        assert_eq!(counter.calls(), 1);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::from_config(registry(), config).await,
            Err(TaskweaveError::Config(_))
        ));
    }
}
