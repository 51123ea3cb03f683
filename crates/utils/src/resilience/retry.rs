//! Blocking retry loop.

use super::config::RetryConfig;
use crate::clock::Clock;
use capbridge_core::{Error, Result};

/// Execute an operation with retry logic, blocking the calling thread
/// between attempts. The closure receives the zero-based attempt index.
pub fn retry<T, C, F>(config: &RetryConfig, clock: &C, operation_name: &str, mut operation: F) -> Result<T>
where
    C: Clock + ?Sized,
    F: FnMut(u32) -> Result<T>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match operation(attempt) {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(operation = operation_name, attempt, "succeeded after retries");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt + 1 < attempts && config.should_retry(&error) {
                    let delay = config.calculate_delay(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        "attempt {}/{} failed, retrying in {:?}: {}",
                        attempt + 1,
                        attempts,
                        delay,
                        error
                    );
                    clock.sleep(delay);
                    last_error = Some(error);
                } else {
                    // Either out of attempts or the error is not retryable
                    return Err(error);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::configuration("retry loop ended unexpectedly")))
}
