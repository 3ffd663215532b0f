// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for transport connections and subscriptions.
//!
//! # Example
//!
//! ```
//! use telemetry_cache::RetryConfig;
//! use std::time::Duration;
//!
//! // Bootstrap: fixed 1s back-off, never give up
//! let bootstrap = RetryConfig::bootstrap();
//! assert_eq!(bootstrap.max_retries, None);
//! assert_eq!(bootstrap.initial_delay, Duration::from_secs(1));
//!
//! // Daemon: exponential back-off for resubscribing at runtime
//! let daemon = RetryConfig::daemon();
//! assert_eq!(daemon.max_retries, None);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
///
/// - [`RetryConfig::bootstrap()`] - Initial connection to the backend
/// - [`RetryConfig::daemon()`] - Re-establishing subscriptions while running
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::bootstrap()
    }
}

impl RetryConfig {
    /// Fixed 1 second back-off, retried forever.
    /// The cache has to come up eventually without an operator stepping in.
    #[must_use]
    pub fn bootstrap() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            factor: 1.0,
        }
    }

    /// Infinite retry with exponential backoff capped at 30 seconds.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, attempts, "operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                match config.max_retries {
                    Some(max) if attempts >= max => return Err(err),
                    Some(max) => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        max,
                        error = %err,
                        "operation failed, retrying in {:?}",
                        delay
                    ),
                    None => warn!(
                        operation = operation_name,
                        attempt = attempts,
                        error = %err,
                        "operation failed (will retry forever), next retry in {:?}",
                        delay
                    ),
                }

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
