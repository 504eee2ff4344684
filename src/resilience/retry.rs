//! Retry with Linear Backoff
//! Bounded attempts for transient gateway failures

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::context::CallContext;
use super::error::{BreakerError, ConfigError, RetryError, RetryExhaustedError};
use crate::observability::metrics::get_metrics;

/// Classifies an operation error. Terminal errors (bad credentials, invalid
/// recipient) stop the retry loop on the spot.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// Delay slept after failed attempt `attempt` (1-based): `attempt * base_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::NotPositive { field: "max_retries" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, returns a terminal error, or runs out of
    /// attempts. No delay follows the final attempt.
    pub async fn run<F, Fut, T, E>(&self, ctx: &CallContext, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let operation = ctx.operation.as_str();
        let max_attempts = self.config.max_retries.max(1);
        let mut errors = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    record_attempt(operation, "success");
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    record_attempt(operation, "terminal");
                    return Err(RetryError::Terminal(e));
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(
                            operation = operation,
                            attempt = attempt,
                            error = %e,
                            "Operation failed after all retries"
                        );
                        record_attempt(operation, "exhausted");
                        errors.push(e);
                        return Err(RetryError::Exhausted(RetryExhaustedError {
                            operation: operation.to_string(),
                            attempts: attempt,
                            errors,
                        }));
                    }

                    let delay = self.config.delay_after(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    record_attempt(operation, "retry");
                    errors.push(e);

                    sleep(delay).await;
                }
            }
        }
    }

    /// Run the whole retry loop as one breaker execution. The circuit sees a
    /// single outcome per logical call, and only exhaustion counts as a
    /// failure.
    pub async fn execute_through<F, Fut, T, E>(
        &self,
        breaker: &CircuitBreaker,
        ctx: &CallContext,
        op: F,
    ) -> Result<T, BreakerError<RetryError<E>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        breaker
            .execute_classified(ctx, || self.run(ctx, op), RetryError::is_exhausted)
            .await
    }
}

fn record_attempt(operation: &str, outcome: &str) {
    if let Some(metrics) = get_metrics() {
        metrics
            .retry_attempts_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}
