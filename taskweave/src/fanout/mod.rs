//! Fan-out over many inputs with order-preserving reassembly.

mod executor;
mod reassembler;

pub use executor::{MapExecutor, DEFAULT_MAX_CONCURRENCY};
pub use reassembler::OrderedReassembler;
