//! Gateway HTTP server.
//!
//! Routes:
//! - `POST /` and `POST /mcp`: one JSON-RPC request, answered by the gateway
//! - `GET /health`: fixed liveness payload
//! - `POST /api/telemetry`: stdio telemetry ingress, always `202 Accepted`

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::domain::models::GatewayConfig;
use crate::services::gateway::Gateway;
use crate::services::http_forwarder::GatewayReply;

/// Configuration for the gateway HTTP server.
#[derive(Debug, Clone)]
pub struct GatewayHttpConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on; 0 picks a free port.
    pub port: u16,
}

impl Default for GatewayHttpConfig {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            host: gateway.host,
            port: gateway.port,
        }
    }
}

impl From<&GatewayConfig> for GatewayHttpConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

/// Shared state for the gateway HTTP server.
pub struct GatewayState {
    pub gateway: Arc<Gateway>,
    pub telemetry: mpsc::UnboundedSender<Value>,
}

pub struct GatewayHttpServer {
    state: Arc<GatewayState>,
    config: GatewayHttpConfig,
}

impl GatewayHttpServer {
    pub fn new(gateway: Arc<Gateway>, telemetry: mpsc::UnboundedSender<Value>, config: GatewayHttpConfig) -> Self {
        Self {
            state: Arc::new(GatewayState { gateway, telemetry }),
            config,
        }
    }

    /// Build the router with all endpoints.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .route("/mcp", post(handle_rpc))
            .route("/health", get(health_check))
            .route("/api/telemetry", post(ingest_telemetry))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind((self.config.host.as_str(), self.config.port)).await
    }

    /// Serve on `listener` until `shutdown` resolves; in-flight requests finish first.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        let mode = self.state.gateway.target().name();
        let router = self.build_router();

        tracing::info!(?addr, mode, "gateway listening");
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await
    }
}

async fn handle_rpc(State(state): State<Arc<GatewayState>>, headers: HeaderMap, body: Bytes) -> Response {
    reply_response(state.gateway.handle(&headers, &body).await)
}

fn reply_response(reply: GatewayReply) -> Response {
    let empty = reply.body.is_empty();
    let mut response = (reply.status, reply.body).into_response();
    if empty {
        response.headers_mut().remove(CONTENT_TYPE);
    } else {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok", "proxy": true}))
}

/// Queue the payload and acknowledge at once. Bodies that are not JSON are
/// dropped here; everything else is the ingestor's to judge.
async fn ingest_telemetry(State(state): State<Arc<GatewayState>>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            if state.telemetry.send(payload).is_err() {
                tracing::warn!("telemetry ingest queue closed; payload dropped");
            }
        }
        Err(_) => tracing::debug!(bytes = body.len(), "non-JSON telemetry payload dropped"),
    }
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_response_headers() {
        let reply = GatewayReply::json(StatusCode::OK, &json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
        let response = reply_response(reply);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");

        let response = reply_response(GatewayReply::accepted());
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_health_payload() {
        let Json(body) = health_check().await;
        assert_eq!(body, json!({"status": "ok", "proxy": true}));
    }
}
