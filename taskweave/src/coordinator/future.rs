//! Eager handles over spawned work.

use crate::core::{InvocationState, SharedInvocation};
use crate::errors::TaskweaveError;
use crate::utils::generate_handle_id;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::watch;
use uuid::Uuid;

type Slot<T> = Option<Result<T, String>>;

/// A handle over work that was started eagerly.
///
/// The work runs on its own task whether or not anyone awaits the handle.
/// [`result`](Self::result) may be called any number of times and from
/// clones of the handle; every call observes the same cached value.
#[derive(Debug, Clone)]
pub struct TaskFuture<T> {
    id: Uuid,
    label: String,
    rx: watch::Receiver<Slot<T>>,
    invocation: Option<SharedInvocation>,
}

impl<T> TaskFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawns `work` and returns a handle to it.
    pub fn spawn<Fut>(label: impl Into<String>, invocation: Option<SharedInvocation>, work: Fut) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let label = label.into();
        let task_label = label.clone();
        tokio::spawn(async move {
            let settled = AssertUnwindSafe(work).catch_unwind().await.map_err(|_| {
                tracing::error!(future = %task_label, "Future task panicked");
                format!("task for '{task_label}' panicked")
            });
            let _ = tx.send(Some(settled));
        });

        Self {
            id: generate_handle_id(),
            label,
            rx,
            invocation,
        }
    }

    /// Returns a handle that is already terminal.
    pub fn ready(label: impl Into<String>, value: T) -> Self {
        let (_tx, rx) = watch::channel(Some(Ok(value)));
        Self {
            id: generate_handle_id(),
            label: label.into(),
            rx,
            invocation: None,
        }
    }

    /// Returns the handle ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the label given at spawn time.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns true once the work has finished. Never blocks.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Returns the value if the work has finished. Never blocks.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        match &*self.rx.borrow() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Returns the shared invocation record, for single-invocation handles.
    #[must_use]
    pub fn invocation(&self) -> Option<&SharedInvocation> {
        self.invocation.as_ref()
    }

    /// Returns the invocation state, for single-invocation handles.
    #[must_use]
    pub fn state(&self) -> Option<InvocationState> {
        self.invocation.as_ref().map(|record| record.read().state())
    }

    /// Waits until the work is terminal, ignoring its value.
    pub async fn settled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Waits for the work and returns its value.
    ///
    /// Business failures are part of `T`. `Err` is returned only when the
    /// task itself was lost, for example because it panicked.
    pub async fn result(&self) -> Result<T, TaskweaveError> {
        let mut rx = self.rx.clone();
        let slot = rx.wait_for(Option::is_some).await.map_err(|_| {
            TaskweaveError::Internal(format!("task for '{}' dropped before completion", self.label))
        })?;
        match &*slot {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(reason)) => Err(TaskweaveError::Internal(reason.clone())),
            None => Err(TaskweaveError::Internal(format!(
                "task for '{}' has no result",
                self.label
            ))),
        }
    }
}
