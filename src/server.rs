use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::platform::greenapi::Notification;
use crate::relay::Relay;

#[derive(Clone)]
struct WebhookState {
    relay: Arc<Relay>,
    token: Option<Arc<str>>,
}

/// Routes for GreenAPI webhook delivery.
pub fn router(relay: Arc<Relay>, webhook_token: Option<String>) -> Router {
    let state = WebhookState {
        relay,
        token: webhook_token.map(Arc::from),
    };

    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/health", get(health))
        .with_state(state)
}

fn authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn receive_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !authorized(state.token.as_deref(), &headers) {
        warn!("Rejected webhook call with bad or missing token");
        return StatusCode::UNAUTHORIZED;
    }

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Webhook body is not JSON: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let kind = value
        .get("typeWebhook")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    match Notification::from_value(value).and_then(Notification::into_inbound) {
        Some(message) => {
            state.relay.dispatch(message).await;
        }
        None => debug!("Ignoring {} notification", kind),
    }

    // GreenAPI re-sends on non-2xx, so relay failures still answer 200.
    StatusCode::OK
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Resolves on Ctrl-C.
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Serve the webhook until Ctrl-C.
pub async fn run(
    relay: Arc<Relay>,
    bind_addr: SocketAddr,
    webhook_token: Option<String>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {}", bind_addr))?;

    info!("Webhook server listening on {}", bind_addr);

    axum::serve(listener, router(relay, webhook_token))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Webhook server failed")?;

    Ok(())
}
