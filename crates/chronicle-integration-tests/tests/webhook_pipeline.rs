//! End-to-end: signed webhook delivery through intake, envelope drain,
//! canonicalization, and embedding generation against a mocked GitHub.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chronicle_core::ratelimit::RateBudgetStore;
use common::{commit_item, sign, Pipeline};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn push_body() -> String {
    json!({
        "ref": "refs/heads/main",
        "repository": {"full_name": "acme/api", "id": 99},
        "installation": {"id": 42}
    })
    .to_string()
}

fn signed_request(body: &str, delivery_id: &str, event: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", delivery_id)
        .header("x-hub-signature-256", sign(body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A push delivery flows all the way to stored embeddings.
#[tokio::test]
async fn test_push_delivery_to_embeddings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/commits"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "4999")
                .insert_header(
                    "x-ratelimit-reset",
                    (chrono::Utc::now().timestamp() + 3600).to_string().as_str(),
                )
                .set_body_json(json!([commit_item("abc123"), commit_item("def456")])),
        )
        .mount(&server)
        .await;

    let pipeline = Pipeline::against(&server.uri());
    let router = chronicle_api::create_router(pipeline.intake_state());

    // 1. Provider delivers a signed webhook; intake acknowledges fast.
    let body = push_body();
    let response = router
        .oneshot(signed_request(&body, "delivery-1", "push"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(pipeline.envelopes.len(), 1);

    // 2. The scheduler drains the envelope: upstream fetch + dedup.
    let processed = pipeline.worker.process_envelopes(10).await.unwrap();
    assert_eq!(processed, 1);
    assert_eq!(pipeline.facts.len(), 2);
    assert_eq!(pipeline.queue_store.len(), 2);

    // Quota from the real response landed in the budget tracker.
    let budget = pipeline
        .budgets
        .get(chronicle_core::InstallationId::new(42))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(budget.remaining, 4999);

    // 3. The embedding drain turns queue items into stored vectors.
    let completed = pipeline.worker.drain_embedding_queue(10).await.unwrap();
    assert_eq!(completed, 2);
    assert!(pipeline.queue_store.is_empty());
    assert_eq!(pipeline.embeddings.len(), 2);
}

/// Redelivered webhooks and repeated drains never duplicate facts.
#[tokio::test]
async fn test_at_least_once_delivery_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([commit_item("abc123")])))
        .mount(&server)
        .await;

    let pipeline = Pipeline::against(&server.uri());
    let router = chronicle_api::create_router(pipeline.intake_state());

    // The provider times out and redelivers; same delivery ID.
    let body = push_body();
    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(signed_request(&body, "delivery-1", "push"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(pipeline.envelopes.len(), 1);

    pipeline.worker.process_envelopes(10).await.unwrap();
    pipeline.worker.process_envelopes(10).await.unwrap();

    assert_eq!(pipeline.facts.len(), 1);
    assert_eq!(pipeline.queue_store.len(), 1);
}

/// Tampered deliveries never reach the envelope store.
#[tokio::test]
async fn test_unsigned_delivery_rejected() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::against(&server.uri());
    let router = chronicle_api::create_router(pipeline.intake_state());

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("x-github-event", "push")
        .header("x-github-delivery", "delivery-1")
        .header("x-hub-signature-256", "sha256=deadbeef")
        .body(Body::from(push_body()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(pipeline.envelopes.is_empty());
}
