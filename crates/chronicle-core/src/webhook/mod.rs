//! # Webhook Intake Module
//!
//! Handles GitHub webhook header parsing, envelope construction, and
//! durable envelope storage for asynchronous processing.
//!
//! The intake path is deliberately thin: verify authenticity, persist
//! the raw envelope, acknowledge. Everything slow (upstream fetches,
//! canonicalization, embeddings) happens out of band in [`crate::sync`].

use crate::{DeliveryId, InstallationId, StoreError, Timestamp, ValidationError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod signature;
pub use signature::{SignatureVerifier, WebhookSecrets};

// ============================================================================
// Core Types
// ============================================================================

/// GitHub-specific HTTP headers required for intake
#[derive(Debug, Clone)]
pub struct WebhookHeaders {
    pub event_type: String,        // X-GitHub-Event
    pub delivery_id: String,       // X-GitHub-Delivery
    pub signature: Option<String>, // X-Hub-Signature-256
    pub content_type: String,      // Content-Type
}

impl WebhookHeaders {
    /// Parse headers from an HTTP header map
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let event_type = headers
            .get("x-github-event")
            .or_else(|| headers.get("X-GitHub-Event"))
            .ok_or_else(|| ValidationError::Required {
                field: "X-GitHub-Event".to_string(),
            })?
            .clone();

        let delivery_id = headers
            .get("x-github-delivery")
            .or_else(|| headers.get("X-GitHub-Delivery"))
            .ok_or_else(|| ValidationError::Required {
                field: "X-GitHub-Delivery".to_string(),
            })?
            .clone();

        let signature = headers
            .get("x-hub-signature-256")
            .or_else(|| headers.get("X-Hub-Signature-256"))
            .cloned();

        let content_type = headers
            .get("content-type")
            .or_else(|| headers.get("Content-Type"))
            .unwrap_or(&"application/json".to_string())
            .clone();

        let headers = Self {
            event_type,
            delivery_id,
            signature,
            content_type,
        };

        headers.validate()?;
        Ok(headers)
    }

    /// Validate header values
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.event_type.is_empty() {
            return Err(ValidationError::Required {
                field: "event_type".to_string(),
            });
        }

        if self.delivery_id.is_empty() {
            return Err(ValidationError::Required {
                field: "delivery_id".to_string(),
            });
        }

        // Signature required for non-ping events
        if self.event_type != "ping" && self.signature.is_none() {
            return Err(ValidationError::Required {
                field: "signature".to_string(),
            });
        }

        // Content type must be JSON
        if !self.content_type.starts_with("application/json") {
            return Err(ValidationError::InvalidFormat {
                field: "content_type".to_string(),
                message: "must be application/json".to_string(),
            });
        }

        Ok(())
    }
}

/// Raw webhook payload plus delivery metadata, stored for asynchronous
/// processing
///
/// Envelopes are keyed by delivery ID. The provider retries delivery on
/// any non-2xx response or timeout, so the same delivery can arrive more
/// than once; [`EnvelopeStore::upsert`] absorbs redeliveries instead of
/// duplicating work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub delivery_id: DeliveryId,
    pub event_type: String,
    pub installation_id: Option<InstallationId>,
    pub payload: serde_json::Value,
    pub received_at: Timestamp,
}

impl WebhookEnvelope {
    /// Build an envelope from validated headers and a parsed payload
    ///
    /// The installation ID is lifted out of the payload when present so
    /// the sync worker can pick the right rate budget without re-parsing.
    pub fn new(headers: &WebhookHeaders, payload: serde_json::Value) -> Result<Self, WebhookError> {
        let delivery_id = DeliveryId::new(headers.delivery_id.clone())?;

        let installation_id = payload
            .get("installation")
            .and_then(|i| i.get("id"))
            .and_then(|id| id.as_u64())
            .map(InstallationId::new);

        Ok(Self {
            delivery_id,
            event_type: headers.event_type.clone(),
            installation_id,
            payload,
            received_at: Timestamp::now(),
        })
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Top-level error for webhook intake failures
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Envelope storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl WebhookError {
    /// Check if error is transient and should be retried by the provider
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Validation(_) => false,
            Self::InvalidSignature => false,
            Self::MalformedPayload { .. } => false,
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> crate::ErrorCategory {
        match self {
            Self::InvalidSignature => crate::ErrorCategory::Security,
            Self::Validation(_) => crate::ErrorCategory::Permanent,
            Self::MalformedPayload { .. } => crate::ErrorCategory::Permanent,
            Self::Storage(e) => {
                if e.is_transient() {
                    crate::ErrorCategory::Transient
                } else {
                    crate::ErrorCategory::Permanent
                }
            }
        }
    }
}

// ============================================================================
// Core Operations (Traits)
// ============================================================================

/// Durable storage for raw webhook envelopes
///
/// Persistence is an external collaborator; implementations must make
/// `upsert` idempotent per delivery ID so redeliveries collapse into a
/// single unit of pending work.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Store an envelope, replacing any existing envelope with the same
    /// delivery ID
    async fn upsert(&self, envelope: WebhookEnvelope) -> Result<(), StoreError>;

    /// List envelopes not yet consumed by the sync worker, oldest first
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<WebhookEnvelope>, StoreError>;

    /// Mark an envelope as consumed; unknown delivery IDs are a no-op
    async fn mark_processed(&self, delivery_id: &DeliveryId) -> Result<(), StoreError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
