//! Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::TelemetryResult;
use crate::metrics::Metrics;

/// Create the metrics router.
pub fn create_router() -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/health", get(|| async { "ok" }))
}

async fn serve_metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Serve `/metrics` on `0.0.0.0:port` until `shutdown` is cancelled.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> TelemetryResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting metrics server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Metrics server stopped");
    Ok(())
}
