//! Bounded retry with exponential backoff and jitter
//!
//! Used by the ledger service to rebuild and re-append an event after another
//! writer advanced the chain head. Jitter spreads competing writers apart so
//! they do not collide again on the next attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0); the delay varies by up to this fraction either way
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::head_conflict(5)
    }
}

impl RetryConfig {
    /// Short, jittered delays for optimistic chain appends
    pub fn head_conflict(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// No delay between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped_delay + offset).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Runs an async operation until it succeeds, fails permanently, or runs out
/// of retries
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying only errors for which `should_retry` is true.
    ///
    /// The last error is returned once `max_retries` retries are spent.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(context, attempts, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if should_retry(&e) && attempts <= self.config.max_retries => {
                    let delay = self.config.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        context,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying operation"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    if attempts > 1 {
                        tracing::warn!(context, attempts, error = %e, "Operation failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}
