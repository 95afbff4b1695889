//! Error types for the taskweave engine.
//!
//! Two families live here. [`InvocationError`] is *data*: it describes why a
//! single function invocation failed and travels through pipelines inside
//! [`Outcome`](crate::core::Outcome) values. Everything else is a control-flow
//! error returned through `Result` for registry, checkpoint, configuration
//! and programmer-misuse faults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for taskweave operations.
#[derive(Debug, Error)]
pub enum TaskweaveError {
    /// A registry error occurred.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A checkpoint store error occurred.
    #[error("{0}")]
    Checkpoint(#[from] CheckpointError),

    /// A configuration error occurred.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// An invocation state transition violated the state machine.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// The API was used in a way that can never succeed.
    #[error("Misuse: {0}")]
    Misuse(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of an [`InvocationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Counts against the retry budget.
    Transient,
    /// The attempt exceeded its timeout; retried like a transient failure.
    Timeout,
    /// Bad input; never retried.
    Validation,
    /// Infrastructure fault such as a missing definition; never retried.
    TerminalPlatform,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeout => write!(f, "timeout"),
            Self::Validation => write!(f, "validation"),
            Self::TerminalPlatform => write!(f, "terminal_platform"),
        }
    }
}

/// Why an invocation attempt failed.
///
/// Computations return this from their `call` hook; the invoker produces
/// `Timeout` itself. Values of this type are carried as pipeline data and are
/// never raised through unrelated call sites.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationError {
    /// A transient failure eligible for retry.
    #[error("Transient error: {message}")]
    Transient {
        /// The error message.
        message: String,
    },

    /// The attempt exceeded the definition timeout.
    #[error("Timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// The input was rejected; skips the remaining retry budget.
    #[error("Validation error: {message}")]
    Validation {
        /// The error message.
        message: String,
    },

    /// A non-retryable infrastructure fault.
    #[error("Platform error: {message}")]
    TerminalPlatform {
        /// The error message.
        message: String,
    },
}

impl InvocationError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a terminal platform error.
    #[must_use]
    pub fn platform(message: impl Into<String>) -> Self {
        Self::TerminalPlatform {
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::TerminalPlatform { .. } => ErrorKind::TerminalPlatform,
        }
    }

    /// Returns true if the failure counts against the retry budget.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }

    /// Prefixes the message with `context`. Timeouts carry no message and
    /// are returned unchanged.
    #[must_use]
    pub fn context(self, context: impl fmt::Display) -> Self {
        match self {
            Self::Transient { message } => Self::Transient {
                message: format!("{context}: {message}"),
            },
            Self::Validation { message } => Self::Validation {
                message: format!("{context}: {message}"),
            },
            Self::TerminalPlatform { message } => Self::TerminalPlatform {
                message: format!("{context}: {message}"),
            },
            timeout @ Self::Timeout { .. } => timeout,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind().to_string()));
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<anyhow::Error> for InvocationError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(format!("{err:#}"))
    }
}

impl From<TaskweaveError> for InvocationError {
    fn from(err: TaskweaveError) -> Self {
        Self::platform(err.to_string())
    }
}

/// Errors raised by the function registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A function or application with this name already exists.
    #[error("Duplicate function name: {name}")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// No function is registered under this name.
    #[error("Unknown function: {name}")]
    UnknownFunction {
        /// The requested name.
        name: String,
    },

    /// No application is registered under this name.
    #[error("Unknown application: {name}")]
    UnknownApplication {
        /// The requested name.
        name: String,
    },

    /// The definition failed validation at registration time.
    #[error("Invalid definition '{name}': {reason}")]
    InvalidDefinition {
        /// The definition name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl RegistryError {
    /// Creates a duplicate name error.
    #[must_use]
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Creates an unknown function error.
    #[must_use]
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }

    /// Creates an unknown application error.
    #[must_use]
    pub fn unknown_application(name: impl Into<String>) -> Self {
        Self::UnknownApplication { name: name.into() }
    }

    /// Creates an invalid definition error.
    #[must_use]
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The underlying storage failed.
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry could not be encoded or decoded.
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The log contains an unreadable record that is not a torn tail.
    #[error("Corrupt checkpoint log at line {line}: {reason}")]
    Corrupt {
        /// One-based line number.
        line: usize,
        /// Parser message.
        reason: String,
    },
}

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration could not be parsed.
    #[error("Config parse error: {0}")]
    Parse(String),

    /// A configuration value is out of range.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The logging subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Raised when an invocation is asked to move to a state it cannot reach.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for invocation '{invocation}': {from} -> {to}")]
pub struct InvalidTransitionError {
    /// Display form of the invocation key.
    pub invocation: String,
    /// The current state.
    pub from: String,
    /// The rejected target state.
    pub to: String,
}
