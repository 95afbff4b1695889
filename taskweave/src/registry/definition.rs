//! Function definitions and their metadata.

use crate::errors::RegistryError;
use crate::functions::Computation;
use crate::invoker::RetryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Advisory resource hints. The core validates but does not enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU units.
    pub cpu: f64,
    /// Memory in gigabytes.
    pub memory_gb: f64,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory_gb: 1.0,
        }
    }
}

impl ResourceSpec {
    /// Creates a resource spec.
    #[must_use]
    pub fn new(cpu: f64, memory_gb: f64) -> Self {
        Self { cpu, memory_gb }
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.cpu.is_finite() && self.cpu > 0.0) {
            return Err(format!("cpu must be a positive number, got {}", self.cpu));
        }
        if !(self.memory_gb.is_finite() && self.memory_gb > 0.0) {
            return Err(format!(
                "memory must be a positive number, got {}",
                self.memory_gb
            ));
        }
        Ok(())
    }
}

/// Input/output serialization tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTag {
    /// Input format tag.
    pub input: String,
    /// Output format tag.
    pub output: String,
}

impl Default for SchemaTag {
    fn default() -> Self {
        Self {
            input: "json".to_string(),
            output: "json".to_string(),
        }
    }
}

/// Opaque build descriptor resolved by the execution substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Image name.
    pub name: String,
    /// Base image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// Build commands, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

impl ImageDescriptor {
    /// Creates a descriptor with a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the base image.
    #[must_use]
    pub fn with_base_image(mut self, base_image: impl Into<String>) -> Self {
        self.base_image = Some(base_image.into());
        self
    }

    /// Appends a build command.
    #[must_use]
    pub fn run(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }
}

/// An immutable function definition.
///
/// Built with the `with_*` methods, then handed to
/// [`FunctionRegistry::register`](super::FunctionRegistry::register), which
/// validates it and freezes it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    name: String,
    resources: ResourceSpec,
    timeout: Option<Duration>,
    retries: Option<RetryPolicy>,
    schema: SchemaTag,
    secrets: Vec<String>,
    image: Option<ImageDescriptor>,
    computation: Arc<dyn Computation>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").unwrap_or_else(|_| unreachable!())
    })
}

/// Returns true if `name` is a legal function or application name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

impl FunctionDefinition {
    /// Creates a definition with default metadata.
    pub fn new(name: impl Into<String>, computation: impl Computation + 'static) -> Self {
        Self::from_arc(name, Arc::new(computation))
    }

    /// Creates a definition around a shared computation.
    #[must_use]
    pub fn from_arc(name: impl Into<String>, computation: Arc<dyn Computation>) -> Self {
        Self {
            name: name.into(),
            resources: ResourceSpec::default(),
            timeout: None,
            retries: None,
            schema: SchemaTag::default(),
            secrets: Vec::new(),
            image: None,
            computation,
        }
    }

    /// Sets the resource hints.
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retries(mut self, retries: RetryPolicy) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the schema tags.
    #[must_use]
    pub fn with_schema(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.schema = SchemaTag {
            input: input.into(),
            output: output.into(),
        };
        self
    }

    /// Adds a secret reference.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.push(secret.into());
        self
    }

    /// Sets the image descriptor.
    #[must_use]
    pub fn with_image(mut self, image: ImageDescriptor) -> Self {
        self.image = Some(image);
        self
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource hints.
    #[must_use]
    pub fn resources(&self) -> ResourceSpec {
        self.resources
    }

    /// Returns the per-attempt timeout, falling back to [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Returns the timeout set on this definition, if any.
    #[must_use]
    pub fn declared_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the retry policy, falling back to no retries.
    #[must_use]
    pub fn retries(&self) -> RetryPolicy {
        self.retries.clone().unwrap_or_default()
    }

    /// Returns the retry policy set on this definition, if any.
    #[must_use]
    pub fn declared_retries(&self) -> Option<&RetryPolicy> {
        self.retries.as_ref()
    }

    /// Returns the schema tags.
    #[must_use]
    pub fn schema(&self) -> &SchemaTag {
        &self.schema
    }

    /// Returns the secret references.
    #[must_use]
    pub fn secrets(&self) -> &[String] {
        &self.secrets
    }

    /// Returns the image descriptor.
    #[must_use]
    pub fn image(&self) -> Option<&ImageDescriptor> {
        self.image.as_ref()
    }

    /// Returns the computation.
    #[must_use]
    pub fn computation(&self) -> &Arc<dyn Computation> {
        &self.computation
    }

    /// Checks the definition for registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDefinition`] describing the first problem.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if !is_valid_name(&self.name) {
            return Err(RegistryError::invalid(
                &self.name,
                "name must start with a letter or underscore and contain only letters, digits, '_' or '-'",
            ));
        }
        self.resources
            .validate()
            .map_err(|reason| RegistryError::invalid(&self.name, reason))?;
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(RegistryError::invalid(&self.name, "timeout must be greater than zero"));
        }
        if let Some(retries) = &self.retries {
            if retries.base_delay_ms > retries.max_delay_ms {
                return Err(RegistryError::invalid(
                    &self.name,
                    "retry base delay exceeds the maximum delay",
                ));
            }
        }
        if let Some(secret) = self.secrets.iter().find(|s| s.trim().is_empty()) {
            return Err(RegistryError::invalid(
                &self.name,
                format!("secret reference '{secret}' is blank"),
            ));
        }
        if self.schema.input.is_empty() || self.schema.output.is_empty() {
            return Err(RegistryError::invalid(&self.name, "schema tags must not be empty"));
        }
        Ok(())
    }
}
