//! Resilience Errors
//! Synthetic errors raised by the breaker and the retry executor

use std::fmt;
use thiserror::Error;

/// Raised by breaker admission when the circuit refuses a call.
/// The wrapped operation was never invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit '{service_name}' is open (failures in window: {failure_count}, retry after {retry_after_ms}ms)")]
pub struct CircuitOpenError {
    pub service_name: String,
    pub retry_after_ms: u64,
    pub failure_count: usize,
}

/// Outcome of a breaker execution that did not produce a value.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// The operation's own error, if the operation ran and failed.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen(_) => None,
        }
    }
}

/// All attempts of a retried operation failed with retryable errors.
#[derive(Debug)]
pub struct RetryExhaustedError<E> {
    pub operation: String,
    pub attempts: u32,
    /// One entry per attempt, oldest first.
    pub errors: Vec<E>,
}

impl<E> RetryExhaustedError<E> {
    pub fn last_error(&self) -> Option<&E> {
        self.errors.last()
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhaustedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation '{}' failed after {} attempts",
            self.operation, self.attempts
        )?;
        if let Some(last) = self.last_error() {
            write!(f, ": {}", last)?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for RetryExhaustedError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .last()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[derive(Error, Debug)]
pub enum RetryError<E>
where
    E: fmt::Display,
{
    /// Non-retryable error, surfaced after the attempt that produced it.
    #[error("{0}")]
    Terminal(E),
    #[error("{0}")]
    Exhausted(RetryExhaustedError<E>),
}

impl<E: fmt::Display> RetryError<E> {
    /// Only exhaustion counts against a circuit.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}
