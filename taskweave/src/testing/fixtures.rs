//! Engine fixtures for pipeline tests.

use std::sync::Arc;

use crate::checkpoint::InMemoryCheckpointStore;
use crate::config::EngineConfig;
use crate::events::CollectingEventSink;
use crate::invoker::{JitterStrategy, RetryPolicy};
use crate::pipeline::Engine;
use crate::registry::{Application, FunctionDefinition, FunctionRegistry};

/// Builds an engine wired to a shared in-memory store and a collecting sink.
///
/// Retry delays default to zero so retry tests stay fast. Reusing the same
/// fixture for several engines simulates a restart over the same store.
#[derive(Debug)]
pub struct TestEngine {
    store: Arc<InMemoryCheckpointStore>,
    events: Arc<CollectingEventSink>,
    config: EngineConfig,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    /// Creates a fixture.
    #[must_use]
    pub fn new() -> Self {
        let config = EngineConfig {
            max_concurrency: 8,
            ..EngineConfig::default()
        };
        Self {
            store: Arc::new(InMemoryCheckpointStore::new()),
            events: Arc::new(CollectingEventSink::new()),
            config,
        }
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the shared checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<InMemoryCheckpointStore> {
        &self.store
    }

    /// Returns the shared event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<CollectingEventSink> {
        &self.events
    }

    /// Builds an engine over `registry`.
    #[must_use]
    pub fn engine(&self, registry: FunctionRegistry) -> Engine {
        Engine::new(registry)
            .with_config(self.config.clone())
            .with_checkpoint_store(self.store.clone())
            .with_event_sink(self.events.clone())
    }
}

/// A retry policy without backoff delay.
#[must_use]
pub fn instant_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::retries(max_retries)
        .with_base_delay_ms(0)
        .with_max_delay_ms(0)
        .with_jitter(JitterStrategy::None)
}

/// Registers `definition`, panicking on failure.
///
/// # Panics
///
/// Panics if the name is invalid or taken.
pub fn add_function(registry: &mut FunctionRegistry, definition: FunctionDefinition) {
    if let Err(err) = registry.register(definition) {
        panic!("fixture registration failed: {err}");
    }
}

/// Registers `application`, panicking on failure.
///
/// # Panics
///
/// Panics if the name is invalid or taken.
pub fn add_application(registry: &mut FunctionRegistry, application: impl Application + 'static) {
    if let Err(err) = registry.register_application(application) {
        panic!("fixture registration failed: {err}");
    }
}
