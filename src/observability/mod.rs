//! Observability Module - Structured Logging, Metrics, Admin Surface

pub mod admin;
pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize JSON logging and Prometheus metrics
pub fn init_observability(service_name: &str) -> anyhow::Result<()> {
    metrics::init_metrics(service_name)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gateway_resilience=debug"));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .try_init()?;

    tracing::info!(
        service = service_name,
        "Observability stack initialized"
    );

    Ok(())
}
