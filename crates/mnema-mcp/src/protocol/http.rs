//! HTTP framing
//!
//! The same JSON-RPC envelope over `POST /rpc`, plus `GET /health`.
//! Requests serialise through a shared server handle; this framing is
//! meant for sidecar deployments, not high fan-out.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

type Shared = Arc<Mutex<McpServer>>;

/// Build the router for the HTTP framing
pub fn router(server: Shared) -> Router {
    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/health", get(handle_health))
        .with_state(server)
}

/// Serve the HTTP framing on `port` until the process exits
pub async fn serve(server: McpServer, port: u16) -> Result<(), std::io::Error> {
    let shared: Shared = Arc::new(Mutex::new(server));
    let app = router(shared);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("HTTP framing listening on 127.0.0.1:{}", port);
    axum::serve(listener, app).await
}

async fn handle_rpc(
    State(server): State<Shared>,
    body: Result<Json<JsonRpcRequest>, axum::extract::rejection::JsonRejection>,
) -> Json<JsonRpcResponse> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(_) => {
            return Json(JsonRpcResponse::error(None, JsonRpcError::parse_error()));
        }
    };

    let mut server = server.lock().await;
    match server.handle_request(request).await {
        Some(response) => Json(response),
        // Notifications get an empty success envelope over HTTP
        None => Json(JsonRpcResponse::success(None, serde_json::json!({}))),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
