//! Fallback Composition
//! Substitutes a default value only while a circuit is open

use serde::Serialize;
use std::future::Future;

use super::circuit_breaker::CircuitBreaker;
use super::context::CallContext;
use super::error::BreakerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackResult<T> {
    pub result: T,
    pub from_fallback: bool,
    pub circuit_open: bool,
}

impl CircuitBreaker {
    /// Execute `op`, returning `fallback` if the circuit rejects the call.
    ///
    /// A genuine failure of `op` is returned as `Err`; the fallback never
    /// hides a call that actually ran.
    pub async fn execute_with_fallback<F, Fut, T, E>(
        &self,
        op: F,
        fallback: T,
    ) -> Result<FallbackResult<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_fallback_in(&CallContext::default(), op, fallback)
            .await
    }

    pub async fn execute_with_fallback_in<F, Fut, T, E>(
        &self,
        ctx: &CallContext,
        op: F,
        fallback: T,
    ) -> Result<FallbackResult<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.execute_with_context(ctx, op).await {
            Ok(result) => Ok(FallbackResult {
                result,
                from_fallback: false,
                circuit_open: false,
            }),
            Err(BreakerError::CircuitOpen(_)) => Ok(FallbackResult {
                result: fallback,
                from_fallback: true,
                circuit_open: true,
            }),
            Err(BreakerError::Operation(e)) => Err(e),
        }
    }
}
