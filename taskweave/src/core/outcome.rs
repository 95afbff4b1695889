//! Tagged invocation result.

use crate::errors::{ErrorKind, InvocationError};
use serde::{Deserialize, Serialize};

/// The terminal result of an invocation: a value or an error, never both.
///
/// Failed outcomes are ordinary data. Downstream stages branch on
/// [`Outcome::is_success`] and pass failures through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The invocation produced a value.
    Succeeded {
        /// The output value.
        value: serde_json::Value,
    },
    /// The invocation failed terminally.
    Failed {
        /// The last recorded error.
        error: InvocationError,
    },
}

impl Outcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn success(value: serde_json::Value) -> Self {
        Self::Succeeded { value }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failure(error: InvocationError) -> Self {
        Self::Failed { error }
    }

    /// Returns true if the outcome carries a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Returns true if the outcome carries an error.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Returns the value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Succeeded { value } => Some(value),
            Self::Failed { .. } => None,
        }
    }

    /// Returns the error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }

    /// Returns the error kind, if failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(InvocationError::kind)
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<serde_json::Value, InvocationError> {
        match self {
            Self::Succeeded { value } => Ok(value),
            Self::Failed { error } => Err(error),
        }
    }

    /// Serialises to the JSON shape handed to reducer functions.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Succeeded { value } => serde_json::json!({
                "status": "succeeded",
                "value": value,
            }),
            Self::Failed { error } => serde_json::json!({
                "status": "failed",
                "error": error,
            }),
        }
    }
}

impl From<Result<serde_json::Value, InvocationError>> for Outcome {
    fn from(result: Result<serde_json::Value, InvocationError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(error),
        }
    }
}
