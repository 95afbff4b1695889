//! Joining over several futures.

use super::TaskFuture;
use crate::errors::TaskweaveError;
use futures::future::{select_all, FutureExt};
use serde::{Deserialize, Serialize};

/// When [`wait`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Return once every future is terminal.
    #[default]
    AllCompleted,
    /// Return once at least one future is terminal.
    FirstCompleted,
}

/// Indices into the waited slice, split by terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitSet {
    /// Futures that were terminal when `wait` returned.
    pub done: Vec<usize>,
    /// Futures still running; they are never cancelled.
    pub pending: Vec<usize>,
}

/// Suspends the caller until `policy` is satisfied.
///
/// # Errors
///
/// Returns [`TaskweaveError::Misuse`] for `FirstCompleted` over no futures,
/// which could never return.
pub async fn wait<T>(futures: &[TaskFuture<T>], policy: WaitPolicy) -> Result<WaitSet, TaskweaveError>
where
    T: Clone + Send + Sync + 'static,
{
    match policy {
        WaitPolicy::AllCompleted => {
            for future in futures {
                future.settled().await;
            }
        }
        WaitPolicy::FirstCompleted => {
            if futures.is_empty() {
                return Err(TaskweaveError::Misuse(
                    "wait(FIRST_COMPLETED) needs at least one future".to_string(),
                ));
            }
            select_all(futures.iter().map(|future| future.settled().boxed())).await;
        }
    }

    let (done, pending): (Vec<_>, Vec<_>) =
        (0..futures.len()).partition(|&i| futures[i].is_terminal());
    tracing::debug!(?policy, done = done.len(), pending = pending.len(), "Wait returned");
    Ok(WaitSet { done, pending })
}
