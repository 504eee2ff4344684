//! Prometheus Metrics for Gateway Resilience
//! Circuit state, call outcomes and retry attempts

use once_cell::sync::{Lazy, OnceCell};
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub struct Metrics {
    pub circuit_breaker_state: GaugeVec,
    pub circuit_transitions_total: CounterVec,
    pub circuit_calls_total: CounterVec,
    pub retry_attempts_total: CounterVec,
}

static METRICS: OnceCell<Metrics> = OnceCell::new();

/// Initialize metrics. Safe to call more than once; later calls are no-ops.
pub fn init_metrics(service_name: &str) -> anyhow::Result<&'static Metrics> {
    METRICS.get_or_try_init(|| {
        let metrics = build_metrics(service_name)?;
        tracing::info!("Prometheus metrics initialized");
        Ok(metrics)
    })
}

fn build_metrics(service_name: &str) -> anyhow::Result<Metrics> {
    let circuit_breaker_state = GaugeVec::new(
        Opts::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=closed, 0.5=half-open, 1=open)",
        )
        .namespace("gateway")
        .const_label("app", service_name),
        &["service"],
    )?;

    let circuit_transitions_total = CounterVec::new(
        Opts::new("circuit_transitions_total", "Circuit state transitions")
            .namespace("gateway")
            .const_label("app", service_name),
        &["service", "from", "to"],
    )?;

    let circuit_calls_total = CounterVec::new(
        Opts::new("circuit_calls_total", "Calls seen by circuit breakers")
            .namespace("gateway")
            .const_label("app", service_name),
        &["service", "outcome"], // success, failure, ignored, rejected
    )?;

    let retry_attempts_total = CounterVec::new(
        Opts::new("retry_attempts_total", "Total retry attempts")
            .namespace("gateway")
            .const_label("app", service_name),
        &["operation", "outcome"],
    )?;

    REGISTRY.register(Box::new(circuit_breaker_state.clone()))?;
    REGISTRY.register(Box::new(circuit_transitions_total.clone()))?;
    REGISTRY.register(Box::new(circuit_calls_total.clone()))?;
    REGISTRY.register(Box::new(retry_attempts_total.clone()))?;

    Ok(Metrics {
        circuit_breaker_state,
        circuit_transitions_total,
        circuit_calls_total,
        retry_attempts_total,
    })
}

/// Metrics instance, if initialized. Recording sites skip silently otherwise.
pub fn get_metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
