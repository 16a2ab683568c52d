//! Observability
//!
//! Logging setup for cyclewatch. All crates emit `tracing` events; the
//! binary decides how they are rendered.

pub mod logging;

pub use logging::{LogConfig, LogLevel, LogOutput};
