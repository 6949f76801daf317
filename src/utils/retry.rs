use std::{fmt::Display, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::utils::strip_html;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, delay: u64) -> u64 {
        let next_delay = delay as f64 * self.exponential;
        let next_delay = if self.jitter {
            // Exponential backoff with full jitter
            // https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
            fastrand::f64() * next_delay
        } else {
            next_delay
        };
        std::cmp::min(self.max_delay_ms, next_delay as u64)
    }
}

/// Runs `operation` until it succeeds or `max_attempts` is reached, sleeping
/// between attempts. Returns the last error on exhaustion.
pub async fn retry<F, Fut, T, E>(operation: F, config: &RetryConfig, context: &str) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    let mut delay = config.base_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempts. Final error: {}",
                        context,
                        attempt,
                        strip_html(&e.to_string())
                    );
                    return Err(e);
                }

                warn!(
                    "Attempt {}/{} for '{}' failed: {}. Retrying in {}ms...",
                    attempt,
                    config.max_attempts,
                    context,
                    strip_html(&e.to_string()),
                    delay
                );

                sleep(Duration::from_millis(delay)).await;

                delay = config.next_delay(delay);
                attempt += 1;
            }
        }
    }
}
