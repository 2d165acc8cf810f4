//! GitHub API client implementing the pipeline's upstream trait.
//!
//! Every read goes through the shared [`ResponseCache`]: fresh entries
//! short-circuit the HTTP call entirely, stale entries contribute their
//! ETag as an `If-None-Match` validator, and a `304 Not Modified` is
//! treated as "nothing new" without burning meaningful quota. Quota
//! headers from real responses surface on the returned page so the sync
//! worker can keep the rate-limit tracker current.

use crate::auth::AppAuthenticator;
use crate::error::{classify_status, classify_transport};
use crate::ClientConfig;
use async_trait::async_trait;
use chronicle_core::cache::{CacheKeyBuilder, FetchOptions, FetchedResponse, ResponseCache};
use chronicle_core::sync::{
    CommitPage, CommitQuery, QuotaSnapshot, RawCommit, UpstreamClient, UpstreamError, UserProfile,
};
use chronicle_core::{InstallationId, Timestamp};
use reqwest::header::{ACCEPT, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

mod rate_limit;
mod retry;

pub use rate_limit::RateLimitInfo;
pub use retry::RetryPolicy;

// ============================================================================
// GitHubClient
// ============================================================================

/// Cached, rate-limit-aware GitHub REST client
pub struct GitHubClient {
    http: reqwest::Client,
    config: ClientConfig,
    auth: Option<Arc<AppAuthenticator>>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Create a client over an explicitly constructed cache.
    ///
    /// `auth` is optional: without it requests go out unauthenticated,
    /// which is enough for development against public repositories.
    pub fn new(
        config: ClientConfig,
        auth: Option<Arc<AppAuthenticator>>,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| UpstreamError::Network {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            auth,
            cache,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the default retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send a request, retrying transport failures within the policy
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut attempt: u32 = 0;
        let mut current = request;
        loop {
            let replay = current.try_clone();
            match current.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let error = classify_transport(e);
                    match replay {
                        Some(next) if self.retry.should_retry(&error, attempt) => {
                            attempt += 1;
                            debug!(attempt, error = %error, "retrying upstream call");
                            tokio::time::sleep(self.retry.delay_for(attempt)).await;
                            current = next;
                        }
                        _ => return Err(error),
                    }
                }
            }
        }
    }

    /// Attach installation credentials when both an authenticator and an
    /// installation are known
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        installation_id: Option<InstallationId>,
    ) -> Result<reqwest::RequestBuilder, UpstreamError> {
        match (&self.auth, installation_id) {
            (Some(auth), Some(installation_id)) => {
                let token = auth.installation_token(installation_id).await?;
                Ok(request.bearer_auth(token))
            }
            _ => Ok(request),
        }
    }

    /// Perform the uncached commit page request.
    ///
    /// Returns the cacheable envelope (commits + continuation cursor),
    /// the response ETag, and the quota snapshot when one was reported.
    async fn request_commit_page(
        &self,
        installation_id: Option<InstallationId>,
        query: &CommitQuery,
        prior_etag: Option<&str>,
    ) -> Result<(Value, Option<String>, Option<QuotaSnapshot>), UpstreamError> {
        let url = format!(
            "{}/repos/{}/commits",
            self.config.base_url, query.repo_full_name
        );
        let page_number: u32 = query
            .cursor
            .as_deref()
            .and_then(|cursor| cursor.parse().ok())
            .unwrap_or(1);

        let mut request = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .query(&[
                ("per_page", self.config.per_page.to_string()),
                ("page", page_number.to_string()),
            ]);

        if let Some(since) = &query.since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }
        if let Some(until) = &query.until {
            request = request.query(&[("until", until.to_rfc3339())]);
        }
        if let Some(author) = &query.author {
            request = request.query(&[("author", author.clone())]);
        }
        if let Some(etag) = prior_etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let request = self.authorize(request, installation_id).await?;
        let response = self.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let quota = RateLimitInfo::from_headers(&headers).map(|info| info.quota());
        let etag = headers
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        if status == StatusCode::NOT_MODIFIED {
            debug!(repo = %query.repo_full_name, "commit listing not modified");
            return Ok((
                json!({ "commits": [], "next_cursor": null }),
                etag.or_else(|| prior_etag.map(String::from)),
                quota,
            ));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body));
        }

        let commits: Value = response.json().await.map_err(|e| UpstreamError::Network {
            message: format!("failed to decode commit listing: {e}"),
        })?;

        let full_page = commits
            .as_array()
            .map(|items| items.len() as u32 == self.config.per_page)
            .unwrap_or(false);
        let next_cursor = full_page.then(|| (page_number + 1).to_string());

        Ok((
            json!({ "commits": commits, "next_cursor": next_cursor }),
            etag,
            quota,
        ))
    }

    /// Decode a cached commit envelope into the worker's page type
    fn parse_commit_page(value: &Value) -> CommitPage {
        let commits = value
            .get("commits")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_commit).collect())
            .unwrap_or_default();

        CommitPage {
            commits,
            next_cursor: value
                .get("next_cursor")
                .and_then(Value::as_str)
                .map(String::from),
            etag: None,
            quota: None,
        }
    }
}

/// Decode one commit item from the listing endpoint
fn parse_commit(item: &Value) -> Option<RawCommit> {
    let sha = item.get("sha").and_then(Value::as_str)?.to_string();
    let commit = item.get("commit")?;

    let author_login = item
        .get("author")
        .and_then(|author| author.get("login"))
        .and_then(Value::as_str)
        .or_else(|| {
            commit
                .get("author")
                .and_then(|author| author.get("name"))
                .and_then(Value::as_str)
        })
        .unwrap_or("unknown")
        .to_string();

    let committed_at = commit
        .get("author")
        .and_then(|author| author.get("date"))
        .and_then(Value::as_str)
        .and_then(|date| Timestamp::from_rfc3339(date).ok())
        .unwrap_or_else(Timestamp::now);

    Some(RawCommit {
        sha,
        node_id: item.get("node_id").and_then(Value::as_str).map(String::from),
        author_login,
        author_gh_id: item
            .get("author")
            .and_then(|author| author.get("id"))
            .and_then(Value::as_u64),
        message: commit
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        url: item
            .get("html_url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        committed_at,
        additions: None,
        deletions: None,
        files_changed: None,
    })
}

/// Deterministic cache key for a commit query
fn commit_cache_key(query: &CommitQuery) -> String {
    let mut builder = CacheKeyBuilder::new("commits").param("repo", &query.repo_full_name);
    if let Some(since) = &query.since {
        builder = builder.date_param("since", since);
    }
    if let Some(until) = &query.until {
        builder = builder.date_param("until", until);
    }
    if let Some(author) = &query.author {
        builder = builder.param("author", author);
    }
    if let Some(cursor) = &query.cursor {
        builder = builder.param("cursor", cursor);
    }
    builder.build()
}

#[async_trait]
impl UpstreamClient for GitHubClient {
    #[instrument(skip(self, query), fields(repo = %query.repo_full_name))]
    async fn fetch_commits(
        &self,
        installation_id: Option<InstallationId>,
        query: &CommitQuery,
    ) -> Result<CommitPage, UpstreamError> {
        let key = commit_cache_key(query);
        let prior_etag = self.cache.get_etag(&key);

        // The fetcher only runs on a cache miss; the slot tells us
        // whether a real HTTP call happened and what quota it reported.
        let quota_slot: Arc<Mutex<Option<QuotaSnapshot>>> = Arc::new(Mutex::new(None));
        let slot = quota_slot.clone();

        let value = self
            .cache
            .get(
                &key,
                FetchOptions {
                    ttl: Some(self.config.cache_ttl),
                    force_refresh: false,
                },
                || async move {
                    let (value, etag, quota) = self
                        .request_commit_page(installation_id, query, prior_etag.as_deref())
                        .await?;
                    *slot.lock().expect("quota slot poisoned") = quota;
                    Ok::<FetchedResponse, UpstreamError>(match etag {
                        Some(etag) => FetchedResponse::with_etag(value, etag),
                        None => FetchedResponse::new(value),
                    })
                },
            )
            .await?;

        let mut page = Self::parse_commit_page(&value);
        page.etag = self.cache.get_etag(&key);
        page.quota = *quota_slot.lock().expect("quota slot poisoned");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn fetch_profile(
        &self,
        installation_id: Option<InstallationId>,
        login: &str,
    ) -> Result<UserProfile, UpstreamError> {
        let key = CacheKeyBuilder::new("profile").param("login", login).build();

        let value = self
            .cache
            .get(
                &key,
                FetchOptions {
                    ttl: Some(self.config.cache_ttl),
                    force_refresh: false,
                },
                || async move {
                    let url = format!("{}/users/{}", self.config.base_url, login);
                    let request = self
                        .http
                        .get(&url)
                        .header(ACCEPT, "application/vnd.github+json");
                    let request = self.authorize(request, installation_id).await?;
                    let response = self.execute(request).await?;

                    let status = response.status();
                    let headers = response.headers().clone();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(classify_status(status, &headers, &body));
                    }

                    let body: Value =
                        response.json().await.map_err(|e| UpstreamError::Network {
                            message: format!("failed to decode profile: {e}"),
                        })?;
                    Ok(FetchedResponse::new(body))
                },
            )
            .await?;

        Ok(UserProfile {
            login: value
                .get("login")
                .and_then(Value::as_str)
                .unwrap_or(login)
                .to_string(),
            gh_id: value.get("id").and_then(Value::as_u64).unwrap_or(0),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    #[instrument(skip(self))]
    async fn probe_rate_limit(
        &self,
        installation_id: Option<InstallationId>,
    ) -> Result<QuotaSnapshot, UpstreamError> {
        let url = format!("{}/rate_limit", self.config.base_url);
        let request = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        let request = self.authorize(request, installation_id).await?;
        let response = self.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body));
        }

        if let Some(info) = RateLimitInfo::from_headers(&headers) {
            return Ok(info.quota());
        }

        // Fall back to the response body when headers are absent
        let body: Value = response.json().await.map_err(|e| UpstreamError::Network {
            message: format!("failed to decode rate limit: {e}"),
        })?;
        let core = body
            .get("resources")
            .and_then(|resources| resources.get("core"))
            .ok_or_else(|| UpstreamError::Network {
                message: "rate limit response missing resources.core".to_string(),
            })?;

        let remaining = core.get("remaining").and_then(Value::as_u64).unwrap_or(0) as u32;
        let reset_at = core
            .get("reset")
            .and_then(Value::as_i64)
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(Timestamp::from_datetime)
            .unwrap_or_else(|| Timestamp::now().add_seconds(3600));

        Ok(QuotaSnapshot {
            remaining,
            reset_at,
        })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
