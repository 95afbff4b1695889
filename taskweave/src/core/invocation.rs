//! Invocation records and their state machine.

use super::{InvocationState, Outcome};
use crate::errors::{InvalidTransitionError, InvocationError};
use crate::utils::{now_utc, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of an invocation within a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationKey {
    /// The pipeline run ID.
    pub run_id: String,
    /// The stage ID within the run.
    pub stage_id: String,
    /// Slot index for map elements; `None` for single calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl InvocationKey {
    /// Creates a key for a single call.
    #[must_use]
    pub fn new(run_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stage_id: stage_id.into(),
            index: None,
        }
    }

    /// Returns a key for slot `index` of this stage.
    #[must_use]
    pub fn slot(&self, index: usize) -> Self {
        Self {
            run_id: self.run_id.clone(),
            stage_id: self.stage_id.clone(),
            index: Some(index),
        }
    }
}

impl fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}/{}[{}]", self.run_id, self.stage_id, index),
            None => write!(f, "{}/{}", self.run_id, self.stage_id),
        }
    }
}

/// One recorded attempt of an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// One-based attempt number.
    pub attempt: u32,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt ended.
    pub ended_at: Option<Timestamp>,
    /// The error, if the attempt failed.
    pub error: Option<InvocationError>,
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// State before.
    pub from: InvocationState,
    /// State after.
    pub to: InvocationState,
    /// When it happened.
    pub at: Timestamp,
}

/// A single function invocation and its full attempt history.
///
/// State changes go through [`Invocation::transition`], which rejects any
/// move the state machine does not allow. Once `Succeeded` or `Failed` is
/// reached the record is frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    key: InvocationKey,
    function: String,
    input: serde_json::Value,
    state: InvocationState,
    attempts: Vec<AttemptRecord>,
    history: Vec<Transition>,
    outcome: Option<Outcome>,
    created_at: Timestamp,
    started_at: Option<Timestamp>,
    ended_at: Option<Timestamp>,
}

/// An invocation shared between the executing task and its observers.
pub type SharedInvocation = Arc<RwLock<Invocation>>;

impl Invocation {
    /// Creates a pending invocation.
    #[must_use]
    pub fn new(key: InvocationKey, function: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            key,
            function: function.into(),
            input,
            state: InvocationState::Pending,
            attempts: Vec::new(),
            history: Vec::new(),
            outcome: None,
            created_at: now_utc(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Wraps the invocation for sharing across tasks.
    #[must_use]
    pub fn shared(self) -> SharedInvocation {
        Arc::new(RwLock::new(self))
    }

    /// Returns the invocation key.
    #[must_use]
    pub fn key(&self) -> &InvocationKey {
        &self.key
    }

    /// Returns the function name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Returns the input value.
    #[must_use]
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Returns the number of attempts started so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Returns the attempt records.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Returns the transition history.
    #[must_use]
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Returns the terminal outcome, once reached.
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Returns when the record was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns when the first attempt started.
    #[must_use]
    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    /// Returns when the invocation reached a terminal state.
    #[must_use]
    pub fn ended_at(&self) -> Option<Timestamp> {
        self.ended_at
    }

    /// Moves to `next`, recording the transition.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransitionError`] if the move is not allowed.
    pub fn transition(&mut self, next: InvocationState) -> Result<(), InvalidTransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransitionError {
                invocation: self.key.to_string(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        let at = now_utc();
        self.history.push(Transition {
            from: self.state,
            to: next,
            at,
        });
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(at);
        }
        Ok(())
    }

    /// Starts a new attempt and returns its one-based number.
    ///
    /// # Errors
    ///
    /// Fails if the invocation cannot enter `Running` from its current state.
    pub fn begin_attempt(&mut self) -> Result<u32, InvalidTransitionError> {
        self.transition(InvocationState::Running)?;
        let started_at = now_utc();
        self.started_at.get_or_insert(started_at);
        self.attempts.push(AttemptRecord {
            attempt: self.attempt_count() + 1,
            started_at,
            ended_at: None,
            error: None,
        });
        Ok(self.attempt_count())
    }

    /// Closes the current attempt with its result.
    fn end_attempt(&mut self, error: Option<InvocationError>) {
        if let Some(current) = self.attempts.last_mut() {
            current.ended_at = Some(now_utc());
            current.error = error;
        }
    }

    /// Records a successful attempt and freezes the record.
    ///
    /// # Errors
    ///
    /// Fails if the invocation is not running.
    pub fn succeed(&mut self, value: serde_json::Value) -> Result<(), InvalidTransitionError> {
        self.transition(InvocationState::Succeeded)?;
        self.end_attempt(None);
        self.outcome = Some(Outcome::success(value));
        Ok(())
    }

    /// Records a failed attempt that will be retried.
    ///
    /// # Errors
    ///
    /// Fails if the invocation is not running.
    pub fn schedule_retry(&mut self, error: InvocationError) -> Result<(), InvalidTransitionError> {
        self.transition(InvocationState::Retrying)?;
        self.end_attempt(Some(error));
        Ok(())
    }

    /// Records the terminal failure and freezes the record.
    ///
    /// Valid from `Running` (last attempt failed) and from `Pending`
    /// (platform fault before any attempt).
    ///
    /// # Errors
    ///
    /// Fails if the invocation is already terminal.
    pub fn fail(&mut self, error: InvocationError) -> Result<(), InvalidTransitionError> {
        let was_running = self.state == InvocationState::Running;
        self.transition(InvocationState::Failed)?;
        if was_running {
            self.end_attempt(Some(error.clone()));
        }
        self.outcome = Some(Outcome::failure(error));
        Ok(())
    }
}
