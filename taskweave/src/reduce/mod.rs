//! In-order folding of map outcomes into one accumulator.
//!
//! A fold applies its reducer to the outcomes strictly in input order, so
//! the same ordered inputs always give the same accumulator no matter how
//! the map completed. [`ReduceFolder::fold_stream`] consumes a
//! completion-order stream and merges each slot as soon as every earlier
//! slot has been merged.

use crate::core::{InvocationKey, Outcome};
use crate::errors::InvocationError;
use crate::fanout::OrderedReassembler;
use crate::invoker::Invoker;
use crate::registry::FunctionDefinition;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// A local merge: `(accumulator, item) -> accumulator`.
pub type MergeFn = dyn Fn(Value, &Outcome) -> Result<Value, InvocationError> + Send + Sync;

/// Called with `(step, accumulator)` after every merge.
pub type FoldObserver = dyn Fn(usize, &Value) + Send + Sync;

/// How one step of a fold is computed.
#[derive(Clone)]
pub enum Reducer {
    /// An in-process closure.
    Local(Arc<MergeFn>),
    /// A registered function, called with `{"accumulator", "item"}` and
    /// returning the next accumulator.
    Function(Arc<FunctionDefinition>),
}

impl Reducer {
    /// Wraps a closure as a reducer.
    pub fn local<F>(merge: F) -> Self
    where
        F: Fn(Value, &Outcome) -> Result<Value, InvocationError> + Send + Sync + 'static,
    {
        Self::Local(Arc::new(merge))
    }

    /// Uses a registered function as the reducer.
    #[must_use]
    pub fn function(definition: Arc<FunctionDefinition>) -> Self {
        Self::Function(definition)
    }
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Reducer::Local"),
            Self::Function(def) => write!(f, "Reducer::Function({})", def.name()),
        }
    }
}

/// Folds outcomes with a [`Reducer`].
#[derive(Clone)]
pub struct ReduceFolder {
    invoker: Invoker,
    key: InvocationKey,
    observer: Option<Arc<FoldObserver>>,
}

impl fmt::Debug for ReduceFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReduceFolder")
            .field("key", &self.key)
            .field("observed", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReduceFolder {
    /// Creates a folder; function reducers run under `key`.
    #[must_use]
    pub fn new(invoker: Invoker, key: InvocationKey) -> Self {
        Self {
            invoker,
            key,
            observer: None,
        }
    }

    /// Sets an observer for intermediate accumulators.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(usize, &Value) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    async fn step(
        &self,
        reducer: &Reducer,
        index: usize,
        accumulator: Value,
        item: &Outcome,
    ) -> Result<Value, InvocationError> {
        let next = match reducer {
            Reducer::Local(merge) => merge(accumulator, item),
            Reducer::Function(definition) => {
                let input = json!({"accumulator": accumulator, "item": item.to_json()});
                let invocation = self
                    .invoker
                    .invoke(definition, self.key.slot(index), input)
                    .await;
                match invocation.outcome().cloned() {
                    Some(outcome) => outcome.into_result(),
                    None => Err(InvocationError::platform("reducer invocation did not finish")),
                }
            }
        };

        let next = next.map_err(|err| err.context(format!("reduce step {index}")))?;
        if let Some(observer) = &self.observer {
            observer(index, &next);
        }
        tracing::trace!(stage = %self.key, step = index, "Merged reduce step");
        Ok(next)
    }

    /// Folds `items` in order starting from `initial`.
    ///
    /// The first failing step fails the fold; its error names the step.
    pub async fn reduce(&self, reducer: &Reducer, items: &[Outcome], initial: Value) -> Outcome {
        let mut accumulator = initial;
        for (index, item) in items.iter().enumerate() {
            accumulator = match self.step(reducer, index, accumulator, item).await {
                Ok(next) => next,
                Err(err) => return Outcome::failure(err),
            };
        }
        Outcome::success(accumulator)
    }

    /// Folds a completion-order stream of `(index, outcome)` pairs.
    ///
    /// Indices must cover `0..len` exactly. A stream that ends before every
    /// slot arrived fails the fold.
    pub async fn fold_stream<S>(&self, reducer: &Reducer, stream: S, len: usize, initial: Value) -> Outcome
    where
        S: Stream<Item = (usize, Outcome)> + Unpin,
    {
        let mut stream = stream;
        let mut reassembler = OrderedReassembler::new();
        let mut accumulator = initial;

        while reassembler.next_index() < len {
            let Some((index, outcome)) = stream.next().await else {
                return Outcome::failure(InvocationError::platform(format!(
                    "stream ended after {} of {len} slots",
                    reassembler.next_index()
                )));
            };
            for (ready_index, item) in reassembler.push(index, outcome) {
                accumulator = match self.step(reducer, ready_index, accumulator, &item).await {
                    Ok(next) => next,
                    Err(err) => return Outcome::failure(err),
                };
            }
        }
        Outcome::success(accumulator)
    }
}
