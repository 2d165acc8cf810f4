//! # Chronicle GitHub Client
//!
//! Outbound GitHub API access for the Chronicle pipeline: commit
//! listing, profile lookup, and rate-limit probing, implemented against
//! the [`chronicle_core::sync::UpstreamClient`] trait.
//!
//! Every call goes through the core [`chronicle_core::ResponseCache`]
//! (with ETag-based conditional requests), reports quota headers back to
//! the caller, and authenticates as a GitHub App installation where an
//! installation is known.

use std::time::Duration;

/// Authentication: app JWTs and cached installation tokens
pub mod auth;

/// HTTP client implementing the upstream trait
pub mod client;

/// Error types and status classification
pub mod error;

pub use auth::{AppAuthenticator, AppCredentials};
pub use client::{GitHubClient, RateLimitInfo};
pub use error::AuthError;

/// Construction-time configuration for [`GitHubClient`].
///
/// Controls endpoints, deadlines, and cache freshness for upstream
/// responses.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL; override for GitHub Enterprise or tests
    pub base_url: String,

    /// User-Agent header (GitHub rejects requests without one)
    pub user_agent: String,

    /// Per-request deadline; a timed-out call is a retryable failure
    pub timeout: Duration,

    /// Freshness window for cached upstream responses
    pub cache_ttl: Duration,

    /// Commits fetched per page
    pub per_page: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            user_agent: "chronicle/0.1".to_string(),
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            per_page: 100,
        }
    }
}

impl ClientConfig {
    /// Override the API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the per-request deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
