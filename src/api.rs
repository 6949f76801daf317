use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::listener::health::HealthStatus;
use crate::listener::ListenerController;
use crate::models::common::ServerConfig;
use crate::models::errors::ListenerError;

type ApiResponse = (StatusCode, Json<Value>);

/// Control and read-model routes. `/metrics` is merged in separately when
/// metrics are enabled.
pub fn router(controller: Arc<ListenerController>) -> Router {
    Router::new()
        .route("/start", get(start_handler))
        .route("/restart", get(restart_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(controller)
}

fn status(status: &str) -> ApiResponse {
    (StatusCode::OK, Json(json!({ "status": status })))
}

fn failure(err: ListenerError) -> ApiResponse {
    error!("Listener control request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

async fn start_handler(State(controller): State<Arc<ListenerController>>) -> ApiResponse {
    match controller.start().await {
        Ok(()) => status("started"),
        Err(ListenerError::AlreadyListening) => status("already running"),
        Err(e) => failure(e),
    }
}

async fn restart_handler(State(controller): State<Arc<ListenerController>>) -> ApiResponse {
    match controller.restart().await {
        Ok(()) => status("restarted"),
        Err(ListenerError::NotListening) => {
            info!("Listener is not running, starting it instead");
            match controller.start().await {
                Ok(()) => status("started"),
                Err(ListenerError::AlreadyListening) => status("already running"),
                Err(e) => failure(e),
            }
        }
        Err(e) => failure(e),
    }
}

async fn health_handler(State(controller): State<Arc<ListenerController>>) -> ApiResponse {
    let report = controller.health();
    let code = if report.status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    match serde_json::to_value(&report) {
        Ok(body) => (code, Json(body)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn stats_handler(State(controller): State<Arc<ListenerController>>) -> ApiResponse {
    match serde_json::to_value(controller.metrics()) {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Serves `app` until `shutdown` is cancelled.
pub async fn serve(
    config: &ServerConfig,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.address, config.port)
        .parse()
        .context("invalid server address")?;

    // Determine the access URL based on the binding address. Only used for logging.
    let access_url = if addr.ip().is_unspecified() {
        format!("http://localhost:{}", addr.port())
    } else {
        format!("http://{}", addr)
    };
    info!(
        "Starting control server - binding to {} (accessible at {})",
        addr, access_url
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Control server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::source::WsEventSourceFactory;
    use crate::listener::ListenerSettings;
    use crate::storage::memory::MemoryStore;

    // Default settings carry no endpoint, so every start fails before dialing
    fn unconfigured() -> Arc<ListenerController> {
        Arc::new(ListenerController::new(
            ListenerSettings::default(),
            Arc::new(WsEventSourceFactory),
            Arc::new(MemoryStore::new()),
            None,
        ))
    }

    #[tokio::test]
    async fn test_start_without_endpoint_is_server_error() {
        let (code, Json(body)) = start_handler(State(unconfigured())).await;

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("streaming endpoint is not configured"));
    }

    #[tokio::test]
    async fn test_restart_falls_through_to_start() {
        let (code, Json(body)) = restart_handler(State(unconfigured())).await;

        // Start is attempted and fails on the missing endpoint
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn test_health_before_start_is_down() {
        let controller = unconfigured();
        let (code, Json(body)) = health_handler(State(controller)).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "down");
        assert_eq!(body["reconnectAttempts"], 0);
        assert_eq!(body["uptime"], 0);
    }

    #[tokio::test]
    async fn test_stats_reports_zeroed_counters() {
        let (code, Json(body)) = stats_handler(State(unconfigured())).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["processedEvents"], 0);
        assert_eq!(body["failedEvents"], 0);
        assert_eq!(body["queuedEvents"], 0);
    }
}
