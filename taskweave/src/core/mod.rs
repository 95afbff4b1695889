//! Core domain model types for taskweave.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Invocation and run status enums
//! - The tagged [`Outcome`] carried between stages
//! - Invocation records with their attempt history

mod invocation;
mod outcome;
mod status;

pub use invocation::{AttemptRecord, Invocation, InvocationKey, SharedInvocation, Transition};
pub use outcome::Outcome;
pub use status::{InvocationState, RunStatus};
