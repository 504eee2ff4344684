//! Resilience Module - Circuit Breakers, Retries, Fallbacks
//! Fault tolerance for outbound calls to SMS, voice, push and email gateways
//!
//! A call site wraps its operation in the retry executor, which runs the
//! whole retry loop as a single breaker execution; the breaker admits the
//! call, awaits it and records one outcome.

mod circuit_breaker;
mod context;
mod error;
mod fallback;
mod observer;
mod registry;
mod retry;
mod state;

pub use circuit_breaker::CircuitBreaker;
pub use context::CallContext;
pub use error::{BreakerError, CircuitOpenError, ConfigError, RetryError, RetryExhaustedError};
pub use fallback::FallbackResult;
pub use observer::{observer_fn, FnObserver, MetricsObserver, StateChangeObserver};
pub use registry::CircuitRegistry;
pub use retry::{RetryConfig, RetryExecutor, Retryable};
pub use state::{CircuitConfig, CircuitSnapshot, CircuitState, CircuitStats};
