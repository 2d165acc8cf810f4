//! Service configuration.
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `CHRONICLE__`-prefixed environment variables (double underscore as
//! the section separator, e.g. `CHRONICLE__SERVER__BIND`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub github: GithubConfig,
    pub cache: CacheSettings,
    pub poller: PollerConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`
    pub bind: String,
}

/// Webhook verification secrets
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Current shared secret
    pub secret: String,
    /// Outgoing secret kept valid through a rotation window
    pub previous_secret: Option<String>,
}

/// Upstream GitHub API settings
#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub base_url: String,
    /// GitHub App ID; unauthenticated mode when absent
    pub app_id: Option<u64>,
    /// Path to the app's PEM-encoded RSA private key
    pub private_key_path: Option<String>,
    /// Per-request deadline in seconds
    pub timeout_secs: u64,
    /// Commits fetched per page
    pub per_page: u32,
}

/// Response cache tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub max_size: usize,
    pub ttl_secs: u64,
}

/// Scheduler settings for the sync worker
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Seconds between worker invocations
    pub interval_secs: u64,
    /// Envelopes drained per tick
    pub envelope_batch: usize,
    /// Embedding items drained per tick
    pub embedding_batch: usize,
}

impl ServiceConfig {
    /// Load configuration from defaults, an optional file, and the
    /// environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("webhook.secret", "development-secret")?
            .set_default("github.base_url", "https://api.github.com")?
            .set_default("github.timeout_secs", 30)?
            .set_default("github.per_page", 100)?
            .set_default("cache.max_size", 500)?
            .set_default("cache.ttl_secs", 300)?
            .set_default("poller.interval_secs", 30)?
            .set_default("poller.envelope_batch", 25)?
            .set_default("poller.embedding_batch", 10)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("CHRONICLE")
                .prefix_separator("__")
                .separator("__"),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
