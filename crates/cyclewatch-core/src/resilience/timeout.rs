//! Timeout Management
//!
//! # Example
//!
//! ```rust,ignore
//! use cyclewatch_core::resilience::with_timeout;
//!
//! let text = with_timeout(Duration::from_secs(120), service.generate(&prompt)).await?;
//! ```

use crate::error::{CycleWatchError, Result};
use std::future::Future;
use std::time::{Duration, Instant};

/// Run a fallible future with a deadline.
///
/// Elapsed deadlines surface as `CycleWatchError::Timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(CycleWatchError::Timeout(timeout)),
    }
}

/// Timeout guard for tracking execution time
pub struct TimeoutGuard {
    start: Instant,
    timeout: Duration,
    name: String,
}

impl TimeoutGuard {
    /// Create a new timeout guard
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
            name: name.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Check if the budget has been spent
    pub fn is_exceeded(&self) -> bool {
        self.elapsed() > self.timeout
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        if self.is_exceeded() {
            tracing::warn!(
                operation = %self.name,
                elapsed_ms = self.elapsed().as_millis() as u64,
                budget_ms = self.timeout.as_millis() as u64,
                "operation exceeded its time budget"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(CycleWatchError::Timeout(_))));
    }

    #[test]
    fn test_guard_budget() {
        let guard = TimeoutGuard::new("explain", Duration::from_secs(60));
        assert!(!guard.is_exceeded());
    }
}
