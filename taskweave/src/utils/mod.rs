//! Utility functions for identifiers and timestamps.

mod ids;
pub mod timestamps;

pub use ids::{generate_handle_id, generate_run_id};
pub use timestamps::{duration_ms, format_timestamp, now_utc, Timestamp};
