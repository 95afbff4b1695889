//! Testing utilities for taskweave applications.
//!
//! This module provides:
//! - Mock computations that count, script, fail, flake or sleep
//! - Assertions over outcomes and reports
//! - An engine fixture sharing one checkpoint store across restarts

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failed_with, assert_report, assert_succeeded};
pub use fixtures::{add_application, add_function, instant_retries, TestEngine};
pub use mocks::{
    CountingComputation, FailingComputation, FlakyComputation, ScriptedComputation,
    SlowComputation,
};
