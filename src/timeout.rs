//! Timeout utilities for engine startup and teardown.
//!
//! Nothing in the channel should wait indefinitely except the stream
//! transport's blocking read, which is tied to the child's lifetime. Startup
//! frames, readiness polling and graceful quits are bounded with the helpers
//! here.

use crate::error::{EngineError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Default timeout for engine startup in seconds
pub const DEFAULT_STARTUP_SECONDS: u64 = 30;

/// Fast operation timeout in seconds (quit requests, probes)
pub const FAST_TIMEOUT_SECONDS: u64 = 5;

/// Timeout configuration for a bounded operation
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration for the operation
    pub duration: Duration,
    /// Whether to log timeout errors
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    /// Create a new timeout configuration
    pub fn new(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    /// Silence the error log on expiry, for timeouts that are expected.
    pub fn quiet(mut self) -> Self {
        self.log_warnings = false;
        self
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        "Starting operation '{}' with timeout of {}ms",
        config.operation_name,
        config.duration.as_millis()
    );

    match timeout(config.duration, future).await {
        Ok(result) => result,
        Err(_) => {
            if config.log_warnings {
                error!(
                    "Operation '{}' timed out after {}ms",
                    config.operation_name,
                    config.duration.as_millis()
                );
            }

            Err(EngineError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Retry budget for polling loops such as HTTP readiness checks.
#[derive(Debug)]
pub struct PollBudget {
    start: Instant,
    max_attempts: u32,
    interval: Duration,
    attempts: u32,
    operation_name: String,
}

impl PollBudget {
    pub fn new(max_attempts: u32, interval: Duration, operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            max_attempts: max_attempts.max(1),
            interval,
            attempts: 0,
            operation_name: operation.into(),
        }
    }

    /// Record one attempt; returns false once the budget is spent.
    pub fn attempt(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        self.attempts += 1;
        if self.attempts > 1 && self.attempts % 10 == 0 {
            warn!(
                "Operation '{}' still polling after {} attempts ({:?})",
                self.operation_name,
                self.attempts,
                self.start.elapsed()
            );
        }
        true
    }

    /// True once every attempt has been used.
    pub fn is_spent(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Sleep for one polling interval.
    pub async fn wait(&self) {
        tokio::time::sleep(self.interval).await;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// The error to report once the budget is exhausted.
    pub fn exhausted(&self) -> EngineError {
        EngineError::StartupTimeout {
            attempts: self.attempts,
            waited_ms: self.elapsed().as_millis() as u64,
        }
    }
}
