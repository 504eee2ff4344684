//! Shared helpers for integration tests

#![allow(dead_code)]

use gateway_resilience::gateway::GatewayError;
use gateway_resilience::resilience::{
    observer_fn, BreakerError, CircuitBreaker, CircuitConfig, CircuitRegistry, CircuitState,
    StateChangeObserver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type Transitions = Arc<Mutex<Vec<(String, CircuitState, CircuitState)>>>;

pub fn new_breaker(config: CircuitConfig) -> CircuitBreaker {
    CircuitRegistry::new()
        .breaker("sms-gateway", config)
        .expect("valid config")
}

pub fn unavailable() -> GatewayError {
    GatewayError::Unavailable("503 from upstream".to_string())
}

/// Observer that records every transition it sees.
pub fn recording_observer() -> (Arc<dyn StateChangeObserver>, Transitions) {
    let seen: Transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = observer_fn(move |service, from, to| {
        sink.lock().unwrap().push((service.to_string(), from, to));
        Ok(())
    });
    (observer, seen)
}

pub fn transitions(seen: &Transitions) -> Vec<(CircuitState, CircuitState)> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|(_, from, to)| (*from, *to))
        .collect()
}

pub async fn call_failing(
    breaker: &CircuitBreaker,
    calls: &AtomicUsize,
) -> Result<(), BreakerError<GatewayError>> {
    breaker
        .execute(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await
}

pub async fn call_succeeding(
    breaker: &CircuitBreaker,
    calls: &AtomicUsize,
) -> Result<&'static str, BreakerError<GatewayError>> {
    breaker
        .execute(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("delivered")
        })
        .await
}
