//! Router-level tests for the webhook intake surface.
//!
//! These drive the axum router with `tower::ServiceExt::oneshot` and
//! assert the full response contract: status codes, body shapes, and
//! what did (or did not) reach the envelope store.

use super::*;
use axum::body::Body;
use axum::http::Request;
use chronicle_core::adapters::InMemoryEnvelopeStore;
use chronicle_core::webhook::WebhookSecrets;
use chronicle_core::InstallationId;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

// ============================================================================
// Helpers
// ============================================================================

const BODY: &str = r#"{"action":"opened","installation":{"id":42}}"#;

fn sign(secret: &str, payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn app(secrets: WebhookSecrets) -> (Router, Arc<InMemoryEnvelopeStore>) {
    let envelopes = Arc::new(InMemoryEnvelopeStore::new());
    let state = AppState::new(
        Arc::new(SignatureVerifier::new(secrets)),
        envelopes.clone(),
    );
    (create_router(state), envelopes)
}

fn webhook_request(signature: &str, delivery_id: &str, event: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", delivery_id)
        .header("x-hub-signature-256", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Accepted delivery tests
// ============================================================================

mod accepted_tests {
    use super::*;

    /// A correctly signed delivery is acknowledged with its delivery ID
    /// and exactly one envelope reaches the store.
    #[tokio::test]
    async fn test_valid_delivery_enqueued() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));
        let signature = sign("current-secret", BODY.as_bytes());

        let response = router
            .oneshot(webhook_request(&signature, "delivery-1", "pull_request", BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["deliveryId"], "delivery-1");

        let pending = envelopes.list_unprocessed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].installation_id, Some(InstallationId::new(42)));
        assert_eq!(pending[0].event_type, "pull_request");
    }

    /// A payload signed with the previous secret is accepted while the
    /// rotation window is open.
    #[tokio::test]
    async fn test_rotation_window_accepts_previous_secret() {
        let (router, envelopes) =
            app(WebhookSecrets::with_previous("new-secret", "old-secret"));
        let signature = sign("old-secret", BODY.as_bytes());

        let response = router
            .oneshot(webhook_request(&signature, "delivery-2", "pull_request", BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(envelopes.len(), 1);
    }

    /// Redelivery of the same delivery ID stays a single envelope.
    #[tokio::test]
    async fn test_redelivery_collapses() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));
        let signature = sign("current-secret", BODY.as_bytes());

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(webhook_request(&signature, "delivery-1", "pull_request", BODY))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(envelopes.len(), 1);
    }

    /// Ping events acknowledge without a signature and without storing
    /// anything.
    #[tokio::test]
    async fn test_ping_acknowledged_without_enqueue() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("content-type", "application/json")
            .header("x-github-event", "ping")
            .header("x-github-delivery", "ping-1")
            .body(Body::from(r#"{"zen":"Keep it logically awesome."}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(envelopes.is_empty());
    }
}

// ============================================================================
// Rejection tests
// ============================================================================

mod rejection_tests {
    use super::*;

    /// A signature minted with a rotated-out secret is rejected once the
    /// previous secret is no longer configured, and nothing is stored.
    #[tokio::test]
    async fn test_stale_secret_rejected() {
        let (router, envelopes) = app(WebhookSecrets::new("new-secret"));
        let signature = sign("old-secret", BODY.as_bytes());

        let response = router
            .oneshot(webhook_request(&signature, "delivery-1", "pull_request", BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid signature");
        assert!(envelopes.is_empty());
    }

    /// Missing provider headers are a 400, not a signature failure.
    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));

        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("content-type", "application/json")
            .body(Body::from(BODY.to_string()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(envelopes.is_empty());
    }

    /// A correctly signed but malformed JSON body is a 400.
    #[tokio::test]
    async fn test_invalid_json_rejected() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));
        let body = "{not json";
        let signature = sign("current-secret", body.as_bytes());

        let response = router
            .oneshot(webhook_request(&signature, "delivery-1", "pull_request", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(envelopes.is_empty());
    }

    /// A tampered body no longer matches the signature.
    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let (router, envelopes) = app(WebhookSecrets::new("current-secret"));
        let signature = sign("current-secret", BODY.as_bytes());
        let tampered = r#"{"action":"closed","installation":{"id":42}}"#;

        let response = router
            .oneshot(webhook_request(&signature, "delivery-1", "pull_request", tampered))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(envelopes.is_empty());
    }
}

// ============================================================================
// Downstream failure tests
// ============================================================================

mod failure_tests {
    use super::*;
    use async_trait::async_trait;
    use chronicle_core::webhook::EnvelopeStore;
    use chronicle_core::DeliveryId;

    /// An envelope store that always refuses writes.
    struct BrokenStore;

    #[async_trait]
    impl EnvelopeStore for BrokenStore {
        async fn upsert(&self, _envelope: WebhookEnvelope) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                message: "document store offline".to_string(),
            })
        }

        async fn list_unprocessed(
            &self,
            _limit: usize,
        ) -> Result<Vec<WebhookEnvelope>, StoreError> {
            Ok(vec![])
        }

        async fn mark_processed(&self, _delivery_id: &DeliveryId) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Storage failure is a 500 so the provider redelivers.
    #[tokio::test]
    async fn test_storage_failure_is_500() {
        let state = AppState::new(
            Arc::new(SignatureVerifier::new(WebhookSecrets::new("current-secret"))),
            Arc::new(BrokenStore),
        );
        let router = create_router(state);
        let signature = sign("current-secret", BODY.as_bytes());

        let response = router
            .oneshot(webhook_request(&signature, "delivery-1", "pull_request", BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

// ============================================================================
// Health tests
// ============================================================================

mod health_tests {
    use super::*;

    /// The liveness probe answers without state.
    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(WebhookSecrets::new("s"));

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
