//! Invocation execution: retry policy and the invoker.

#[allow(clippy::module_inception)]
mod invoker;
mod retry;

pub use invoker::Invoker;
pub(crate) use invoker::panic_message;
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryState,
};
