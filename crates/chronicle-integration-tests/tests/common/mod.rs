//! Shared fixtures for the integration suite.

use chronicle_core::adapters::{
    InMemoryDimensionStore, InMemoryEmbeddingQueueStore, InMemoryEmbeddingStore,
    InMemoryEnvelopeStore, InMemoryEventFactStore, InMemoryJobStore, InMemoryRateBudgetStore,
};
use chronicle_core::cache::{CacheConfig, ResponseCache};
use chronicle_core::webhook::{SignatureVerifier, WebhookSecrets};
use chronicle_core::{
    Canonicalizer, EmbeddingError, EmbeddingGenerator, EmbeddingQueue, JobCoordinator,
    RateLimitTracker, SyncWorker,
};
use chronicle_github::{ClientConfig, GitHubClient};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

pub const WEBHOOK_SECRET: &str = "integration-secret";

/// Deterministic stub generator so vector contents are assertable.
pub struct FixedGenerator;

#[async_trait::async_trait]
impl EmbeddingGenerator for FixedGenerator {
    async fn generate(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![0.5; 4])
    }
}

/// Everything a test needs to drive the pipeline end to end.
pub struct Pipeline {
    pub worker: SyncWorker,
    pub envelopes: Arc<InMemoryEnvelopeStore>,
    pub facts: Arc<InMemoryEventFactStore>,
    pub queue_store: Arc<InMemoryEmbeddingQueueStore>,
    pub embeddings: Arc<InMemoryEmbeddingStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub budgets: Arc<InMemoryRateBudgetStore>,
}

impl Pipeline {
    /// Build a pipeline whose upstream is the given mocked base URL.
    pub fn against(base_url: &str) -> Self {
        let envelopes = Arc::new(InMemoryEnvelopeStore::new());
        let facts = Arc::new(InMemoryEventFactStore::new());
        let dimensions = Arc::new(InMemoryDimensionStore::new());
        let queue_store = Arc::new(InMemoryEmbeddingQueueStore::new());
        let embeddings = Arc::new(InMemoryEmbeddingStore::new());
        let jobs = Arc::new(InMemoryJobStore::new());
        let budgets = Arc::new(InMemoryRateBudgetStore::new());

        let cache = Arc::new(ResponseCache::new(CacheConfig {
            max_size: 100,
            default_ttl: Duration::from_secs(300),
        }));
        let client = GitHubClient::new(
            ClientConfig {
                per_page: 100,
                ..ClientConfig::default().with_base_url(base_url)
            },
            None,
            cache,
        )
        .expect("client construction cannot fail with rustls");

        let worker = SyncWorker::new(
            envelopes.clone(),
            facts.clone(),
            Canonicalizer::new(facts.clone(), dimensions),
            EmbeddingQueue::new(queue_store.clone(), embeddings.clone()),
            JobCoordinator::new(jobs.clone()),
            RateLimitTracker::new(budgets.clone()),
            Arc::new(client),
            Arc::new(FixedGenerator),
        );

        Self {
            worker,
            envelopes,
            facts,
            queue_store,
            embeddings,
            jobs,
            budgets,
        }
    }

    /// Coordinator over the same job store, for assertions and setup.
    pub fn coordinator(&self) -> JobCoordinator {
        JobCoordinator::new(self.jobs.clone())
    }

    /// The intake state wired to this pipeline's envelope store.
    pub fn intake_state(&self) -> chronicle_api::AppState {
        chronicle_api::AppState::new(
            Arc::new(SignatureVerifier::new(WebhookSecrets::new(WEBHOOK_SECRET))),
            self.envelopes.clone(),
        )
    }
}

/// Sign a payload the way the provider does.
pub fn sign(payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// One commit item as the listing endpoint renders it.
pub fn commit_item(sha: &str) -> Value {
    json!({
        "sha": sha,
        "node_id": format!("C_{sha}"),
        "html_url": format!("https://github.com/acme/api/commit/{sha}"),
        "commit": {
            "message": format!("fix: {sha}"),
            "author": {"name": "Octo Cat", "date": "2024-03-01T12:00:00Z"}
        },
        "author": {"login": "octocat", "id": 583231}
    })
}
