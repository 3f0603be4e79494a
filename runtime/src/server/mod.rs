//! REST API server for the execution service

pub mod execute;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use capsules_code_exec::ExecutionService;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Create the REST API application router
pub fn create_app(service: ExecutionService) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/execute", post(execute::execute))
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_check() -> &'static str {
    "OK"
}

/// Ready once the isolation runtime resolves to an executable.
async fn readiness(Extension(service): Extension<ExecutionService>) -> Response {
    match service.preflight() {
        Ok(path) => (
            StatusCode::OK,
            Json(json!({
                "ready": true,
                "runtime": path.display().to_string(),
                "error": null,
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "runtime": service.config().runtime_path.display().to_string(),
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}

/// Start the REST API server and run until Ctrl-C.
pub async fn serve(addr: SocketAddr, service: ExecutionService) -> anyhow::Result<()> {
    let app = create_app(service);

    info!("Starting REST API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("REST API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(error = %err, "unable to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
