//! Chronicle service binary.
//!
//! Wires the pipeline together: configuration, tracing, the response
//! cache, the GitHub client, the sync worker, the webhook intake
//! server, and the scheduler that drives the worker.
//!
//! The in-memory store adapters back this binary by default; a
//! production deployment swaps them for a persistent document store by
//! providing its own implementations of the core store traits.

mod config;
mod poller;

use anyhow::Context;
use chronicle_api::AppState;
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
use chronicle_github::{AppAuthenticator, AppCredentials, ClientConfig, GitHubClient};
use clap::Parser;
use config::ServiceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chronicle: GitHub activity ingestion and embedding pipeline
#[derive(Debug, Parser)]
#[command(name = "chronicle-service", version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "CHRONICLE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// Placeholder generator used until a real embedding backend is wired
/// in; hashes the text into a deterministic low-dimension vector so the
/// rest of the pipeline is exercisable end to end.
struct HashingGenerator;

#[async_trait::async_trait]
impl EmbeddingGenerator for HashingGenerator {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = Vec::with_capacity(8);
        for salt in 0u8..8 {
            let mut hasher = DefaultHasher::new();
            salt.hash(&mut hasher);
            text.hash(&mut hasher);
            vector.push((hasher.finish() % 1000) as f32 / 1000.0);
        }
        Ok(vector)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    info!(bind = %config.server.bind, "starting chronicle");

    // Stores (in-memory adapters for the development binary)
    let envelopes = Arc::new(InMemoryEnvelopeStore::new());
    let facts = Arc::new(InMemoryEventFactStore::new());
    let dimensions = Arc::new(InMemoryDimensionStore::new());
    let queue_store = Arc::new(InMemoryEmbeddingQueueStore::new());
    let embeddings = Arc::new(InMemoryEmbeddingStore::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let budgets = Arc::new(InMemoryRateBudgetStore::new());

    // Response cache: one explicit instance owned by this process
    let cache = Arc::new(ResponseCache::new(CacheConfig {
        max_size: config.cache.max_size,
        default_ttl: Duration::from_secs(config.cache.ttl_secs),
    }));

    // Upstream client, authenticated when app credentials are configured
    let auth = match (&config.github.app_id, &config.github.private_key_path) {
        (Some(app_id), Some(key_path)) => {
            let pem = std::fs::read_to_string(key_path)
                .with_context(|| format!("failed to read private key from {key_path}"))?;
            Some(Arc::new(AppAuthenticator::new(
                AppCredentials::new(*app_id, pem),
                config.github.base_url.clone(),
                reqwest::Client::new(),
            )))
        }
        _ => {
            warn!("no GitHub App credentials configured; upstream calls are unauthenticated");
            None
        }
    };

    let client_config = ClientConfig {
        base_url: config.github.base_url.clone(),
        timeout: Duration::from_secs(config.github.timeout_secs),
        cache_ttl: Duration::from_secs(config.cache.ttl_secs),
        per_page: config.github.per_page,
        ..ClientConfig::default()
    };
    let upstream = Arc::new(
        GitHubClient::new(client_config, auth, cache)
            .map_err(|e| anyhow::anyhow!("failed to build GitHub client: {e}"))?,
    );

    // Pipeline
    let worker = Arc::new(SyncWorker::new(
        envelopes.clone(),
        facts.clone(),
        Canonicalizer::new(facts, dimensions),
        EmbeddingQueue::new(queue_store, embeddings),
        JobCoordinator::new(jobs),
        RateLimitTracker::new(budgets),
        upstream,
        Arc::new(HashingGenerator),
    ));

    // Scheduler: the external timer the core's blocked state relies on
    tokio::spawn(poller::run(worker, config.poller.clone()));

    // Intake server
    let secrets = match &config.webhook.previous_secret {
        Some(previous) => {
            WebhookSecrets::with_previous(config.webhook.secret.clone(), previous.clone())
        }
        None => WebhookSecrets::new(config.webhook.secret.clone()),
    };
    let state = AppState::new(Arc::new(SignatureVerifier::new(secrets)), envelopes);

    let addr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    chronicle_api::serve(addr, state)
        .await
        .context("intake server failed")?;

    info!("chronicle shut down cleanly");
    Ok(())
}
