//! Admin & Metrics HTTP Server
//! Circuit snapshots, manual reset/force-open, /health/live and /metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use super::metrics::encode_metrics;
use crate::resilience::CircuitRegistry;

pub type AdminState = Arc<CircuitRegistry>;

pub fn admin_router(registry: AdminState) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .route("/circuits", get(list_circuits))
        .route("/circuits/reset", post(reset_all_circuits))
        .route("/circuits/:name", get(get_circuit))
        .route("/circuits/:name/reset", post(reset_circuit))
        .route("/circuits/:name/open", post(force_open_circuit))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Start the admin HTTP server
#[instrument(skip(registry))]
pub async fn start_admin_server(port: u16, registry: AdminState) -> anyhow::Result<()> {
    let app = admin_router(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Admin/metrics server started");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

async fn list_circuits(State(registry): State<AdminState>) -> impl IntoResponse {
    Json(registry.get_all_circuit_states())
}

fn unknown_circuit(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "unknown circuit", "service": name })),
    )
        .into_response()
}

async fn get_circuit(
    State(registry): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match registry.get(&name) {
        Some(breaker) => Json(breaker.snapshot()).into_response(),
        None => unknown_circuit(&name),
    }
}

#[instrument(skip(registry))]
async fn reset_circuit(
    State(registry): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match registry.get(&name) {
        Some(breaker) => {
            breaker.reset();
            Json(breaker.snapshot()).into_response()
        }
        None => unknown_circuit(&name),
    }
}

#[instrument(skip(registry))]
async fn force_open_circuit(
    State(registry): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match registry.get(&name) {
        Some(breaker) => {
            breaker.force_open();
            Json(breaker.snapshot()).into_response()
        }
        None => unknown_circuit(&name),
    }
}

#[instrument(skip(registry))]
async fn reset_all_circuits(State(registry): State<AdminState>) -> impl IntoResponse {
    registry.reset_all_circuits();
    Json(registry.get_all_circuit_states())
}
