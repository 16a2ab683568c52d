//! Resilience Patterns
//!
//! Timeout enforcement for calls to external collaborators. Only the
//! narrative service is called with a deadline; graph computation is local
//! and runs to completion.

pub mod timeout;

pub use timeout::{TimeoutGuard, with_timeout};
