//! State Change Observers
//! Subscribers notified on every circuit transition (logging, metrics, alerting)

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use super::state::CircuitState;
use crate::observability::metrics::get_metrics;

pub trait StateChangeObserver: Send + Sync {
    fn on_state_change(
        &self,
        service: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> anyhow::Result<()>;

    /// Called once when a circuit carrying this observer is created.
    fn on_register(&self, _service: &str, _initial: CircuitState) {}
}

/// Adapts a closure into an observer.
pub struct FnObserver<F>(F);

impl<F> StateChangeObserver for FnObserver<F>
where
    F: Fn(&str, CircuitState, CircuitState) -> anyhow::Result<()> + Send + Sync,
{
    fn on_state_change(
        &self,
        service: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> anyhow::Result<()> {
        (self.0)(service, from, to)
    }
}

pub fn observer_fn<F>(f: F) -> Arc<dyn StateChangeObserver>
where
    F: Fn(&str, CircuitState, CircuitState) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

/// Feeds the Prometheus state gauge and transition counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl StateChangeObserver for MetricsObserver {
    fn on_state_change(
        &self,
        service: &str,
        from: CircuitState,
        to: CircuitState,
    ) -> anyhow::Result<()> {
        if let Some(metrics) = get_metrics() {
            metrics
                .circuit_breaker_state
                .with_label_values(&[service])
                .set(to.gauge_value());
            metrics
                .circuit_transitions_total
                .with_label_values(&[service, from.as_str(), to.as_str()])
                .inc();
        }
        Ok(())
    }

    fn on_register(&self, service: &str, initial: CircuitState) {
        if let Some(metrics) = get_metrics() {
            metrics
                .circuit_breaker_state
                .with_label_values(&[service])
                .set(initial.gauge_value());
        }
    }
}

/// Notify every observer. Errors and panics are logged and dropped so they
/// never reach the caller of the breaker.
pub(crate) fn notify_all(
    observers: &[Arc<dyn StateChangeObserver>],
    service: &str,
    from: CircuitState,
    to: CircuitState,
) {
    for observer in observers {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            observer.on_state_change(service, from, to)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    service = service,
                    from = from.as_str(),
                    to = to.as_str(),
                    error = %e,
                    "State change observer failed"
                );
            }
            Err(_) => {
                error!(
                    service = service,
                    from = from.as_str(),
                    to = to.as_str(),
                    "State change observer panicked"
                );
            }
        }
    }
}
