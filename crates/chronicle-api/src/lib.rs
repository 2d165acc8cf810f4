//! # Chronicle API
//!
//! HTTP intake surface for provider webhooks.
//!
//! The handler implements the immediate-response pattern: verify the
//! signature, durably enqueue the raw envelope, and return 2xx well
//! inside the provider's delivery timeout. Everything slow — upstream
//! fetches, canonicalization, embeddings — happens out of band in the
//! sync worker.
//!
//! # Response contract
//!
//! | Status | Condition |
//! |--------|-----------|
//! | 200    | Envelope stored (or ping acknowledged) |
//! | 400    | Missing/invalid headers or malformed JSON |
//! | 401    | Signature mismatch |
//! | 500    | Envelope storage failed (provider will redeliver) |

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chronicle_core::webhook::{
    EnvelopeStore, SignatureVerifier, WebhookEnvelope, WebhookHeaders,
};
use chronicle_core::{StoreError, ValidationError};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared state injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub envelopes: Arc<dyn EnvelopeStore>,
}

impl AppState {
    /// Create application state from its collaborators
    pub fn new(verifier: Arc<SignatureVerifier>, envelopes: Arc<dyn EnvelopeStore>) -> Self {
        Self {
            verifier,
            envelopes,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the intake router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/github", post(handle_webhook))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until shutdown is signalled (ctrl-c or SIGTERM)
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), ServeError> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServeError::Bind {
            addr,
            message: e.to_string(),
        })?;

    info!(addr = %addr, "webhook intake listening");

    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install ctrl-c handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServeError::Server {
            message: e.to_string(),
        })
}

/// Errors from running the intake server
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Failed to bind {addr}: {message}")]
    Bind { addr: SocketAddr, message: String },

    #[error("Server failed: {message}")]
    Server { message: String },
}

// ============================================================================
// Response Types
// ============================================================================

/// 2xx acknowledgement for an accepted delivery
#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    pub ok: bool,
    #[serde(rename = "deliveryId")]
    pub delivery_id: String,
}

/// Error body for every non-2xx response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Health probe response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

// ============================================================================
// Handler Errors
// ============================================================================

/// Failures surfaced by the webhook handler, mapped onto the response
/// contract
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("Invalid headers: {0}")]
    InvalidHeaders(ValidationError),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid JSON payload: {message}")]
    InvalidJson { message: String },

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(ValidationError),

    #[error("Envelope storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidHeaders(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::InvalidSignature => (StatusCode::UNAUTHORIZED, "Invalid signature".to_string()),
            Self::InvalidJson { message } => (
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON payload: {message}"),
            ),
            Self::InvalidEnvelope(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            // 500 on purpose: the provider retries delivery on non-2xx,
            // so a storage blip costs nothing but a redelivery.
            Self::Storage(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept one provider webhook delivery.
///
/// Fast path only: header validation, signature verification over the
/// raw body bytes, JSON parse, durable enqueue, acknowledge.
#[instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAccepted>, WebhookHandlerError> {
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_lowercase(),
                value.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let webhook_headers =
        WebhookHeaders::from_http_headers(&header_map).map_err(WebhookHandlerError::InvalidHeaders)?;

    // Ping is the provider's endpoint test: acknowledge, enqueue nothing.
    if webhook_headers.event_type == "ping" {
        info!(delivery_id = %webhook_headers.delivery_id, "acknowledged ping");
        return Ok(Json(WebhookAccepted {
            ok: true,
            delivery_id: webhook_headers.delivery_id,
        }));
    }

    // Signature presence was validated with the headers; verify it over
    // the raw, unparsed body bytes.
    let signature = webhook_headers
        .signature
        .as_deref()
        .ok_or(WebhookHandlerError::InvalidSignature)?;
    if !state.verifier.verify(&body, signature) {
        warn!(
            delivery_id = %webhook_headers.delivery_id,
            event_type = %webhook_headers.event_type,
            "rejected webhook with invalid signature"
        );
        return Err(WebhookHandlerError::InvalidSignature);
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| WebhookHandlerError::InvalidJson {
            message: e.to_string(),
        })?;

    let envelope =
        WebhookEnvelope::new(&webhook_headers, payload).map_err(|e| match e {
            chronicle_core::webhook::WebhookError::Validation(v) => {
                WebhookHandlerError::InvalidEnvelope(v)
            }
            other => WebhookHandlerError::InvalidJson {
                message: other.to_string(),
            },
        })?;

    let delivery_id = envelope.delivery_id.as_str().to_string();
    state.envelopes.upsert(envelope).await?;

    info!(
        delivery_id = %delivery_id,
        event_type = %webhook_headers.event_type,
        "stored webhook envelope"
    );

    Ok(Json(WebhookAccepted {
        ok: true,
        delivery_id,
    }))
}

/// Liveness probe
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
