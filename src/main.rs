//! Gateway Resilience - admin daemon
//! Registers the gateway circuits and serves the admin/metrics surface

use gateway_resilience::observability::{self, admin::start_admin_server};
use gateway_resilience::resilience::{CircuitRegistry, MetricsObserver};
use gateway_resilience::Config;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    observability::init_observability("gateway-resilience")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_retries = config.retry.max_retries,
        base_delay_ms = config.retry.base_delay.as_millis() as u64,
        "Starting gateway resilience service..."
    );

    let registry = Arc::new(CircuitRegistry::new());
    let metrics_observer = Arc::new(MetricsObserver);

    for (gateway, circuit_config) in config.circuits {
        let circuit_config = circuit_config.with_observer(metrics_observer.clone());
        registry.breaker(gateway.service_name(), circuit_config)?;
    }
    info!(circuits = registry.len(), "Gateway circuits registered");

    let admin_registry = Arc::clone(&registry);
    let admin_port = config.admin_port;
    let server = tokio::spawn(async move {
        if let Err(e) = start_admin_server(admin_port, admin_registry).await {
            error!(error = %e, "Admin server failed");
        }
    });

    tokio::select! {
        _ = server => {
            error!("Admin server exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Gateway resilience service stopped");
    Ok(())
}
