//! Logging setup and timing helpers.

mod logging;
mod timer;

pub use logging::init_logging;
pub use timer::SpanTimer;
