//! Tests for [`GitHubClient`] against a mocked GitHub API.

use super::*;
use chronicle_core::cache::CacheConfig;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn commit_item(sha: &str) -> Value {
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

fn quota_headers(template: ResponseTemplate, remaining: u32) -> ResponseTemplate {
    let reset = chrono::Utc::now().timestamp() + 1800;
    template
        .insert_header("x-ratelimit-limit", "5000")
        .insert_header("x-ratelimit-remaining", remaining.to_string().as_str())
        .insert_header("x-ratelimit-reset", reset.to_string().as_str())
}

fn client(base_url: &str, cache_ttl: Duration) -> GitHubClient {
    let config = ClientConfig {
        cache_ttl,
        per_page: 2,
        ..ClientConfig::default().with_base_url(base_url)
    };
    let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
    GitHubClient::new(config, None, cache).unwrap()
}

fn commit_query(repo: &str) -> CommitQuery {
    CommitQuery {
        repo_full_name: repo.to_string(),
        ..Default::default()
    }
}

// ============================================================================
// fetch_commits tests
// ============================================================================

mod fetch_commits_tests {
    use super::*;

    /// A commit listing parses into raw commits with quota and ETag.
    #[tokio::test]
    async fn test_parses_commit_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .respond_with(quota_headers(
                ResponseTemplate::new(200)
                    .insert_header("etag", "W/\"page-1\"")
                    .set_body_json(json!([commit_item("abc123")])),
                4999,
            ))
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));
        let page = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();

        assert_eq!(page.commits.len(), 1);
        let commit = &page.commits[0];
        assert_eq!(commit.sha, "abc123");
        assert_eq!(commit.author_login, "octocat");
        assert_eq!(commit.author_gh_id, Some(583231));
        assert!(commit.url.ends_with("/commit/abc123"));

        assert_eq!(page.quota.unwrap().remaining, 4999);
        assert_eq!(page.etag.as_deref(), Some("W/\"page-1\""));
        assert!(page.next_cursor.is_none(), "partial page ends pagination");
    }

    /// A second call inside the TTL is served from cache without a
    /// request, and reports no quota since nothing was spent.
    #[tokio::test]
    async fn test_fresh_cache_hit_skips_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .respond_with(quota_headers(
                ResponseTemplate::new(200).set_body_json(json!([commit_item("abc123")])),
                4999,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));

        let first = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();
        let second = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();

        assert!(first.quota.is_some());
        assert!(second.quota.is_none());
        assert_eq!(second.commits.len(), 1);
    }

    /// After the TTL lapses, the stale entry's ETag rides along as
    /// If-None-Match and a 304 means "nothing new".
    #[tokio::test]
    async fn test_stale_entry_revalidates_with_etag() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .and(header("if-none-match", "W/\"page-1\""))
            .respond_with(quota_headers(ResponseTemplate::new(304), 4998))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .respond_with(quota_headers(
                ResponseTemplate::new(200)
                    .insert_header("etag", "W/\"page-1\"")
                    .set_body_json(json!([commit_item("abc123")])),
                4999,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::ZERO);

        let first = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();
        assert_eq!(first.commits.len(), 1);

        std::thread::sleep(Duration::from_millis(5));

        let second = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();
        assert!(second.commits.is_empty(), "304 reports nothing new");
        assert_eq!(second.quota.unwrap().remaining, 4998);
    }

    /// A full page yields a continuation cursor for the next page.
    #[tokio::test]
    async fn test_full_page_advances_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .and(query_param("page", "1"))
            .respond_with(quota_headers(
                ResponseTemplate::new(200)
                    .set_body_json(json!([commit_item("a1"), commit_item("a2")])),
                4999,
            ))
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));
        let page = client
            .fetch_commits(None, &commit_query("acme/api"))
            .await
            .unwrap();

        assert_eq!(page.commits.len(), 2);
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
    }

    /// 404 surfaces as a permanent error so the job fails, not blocks.
    #[tokio::test]
    async fn test_missing_repo_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/gone/commits"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "Not Found"
            })))
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));
        let result = client.fetch_commits(None, &commit_query("acme/gone")).await;

        assert!(matches!(
            result,
            Err(UpstreamError::Permanent { status: 404, .. })
        ));
    }

    /// 403 with a spent window surfaces as rate limiting.
    #[tokio::test]
    async fn test_spent_quota_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .respond_with(quota_headers(
                ResponseTemplate::new(403).set_body_json(json!({
                    "message": "API rate limit exceeded"
                })),
                0,
            ))
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));
        let result = client.fetch_commits(None, &commit_query("acme/api")).await;

        assert!(matches!(result, Err(UpstreamError::RateLimited { .. })));
    }
}

// ============================================================================
// fetch_profile / probe_rate_limit tests
// ============================================================================

mod profile_tests {
    use super::*;

    /// Profiles parse and cache like any other upstream read.
    #[tokio::test]
    async fn test_fetch_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/octocat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "login": "octocat",
                "id": 583231,
                "name": "The Octocat"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));

        let profile = client.fetch_profile(None, "octocat").await.unwrap();
        assert_eq!(profile.login, "octocat");
        assert_eq!(profile.gh_id, 583231);
        assert_eq!(profile.name.as_deref(), Some("The Octocat"));

        // Second lookup is a cache hit
        client.fetch_profile(None, "octocat").await.unwrap();
    }

    /// The rate limit probe prefers headers and falls back to the body.
    #[tokio::test]
    async fn test_probe_rate_limit_from_body() {
        let server = MockServer::start().await;
        let reset = chrono::Utc::now().timestamp() + 900;
        Mock::given(method("GET"))
            .and(path("/rate_limit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": {"core": {"limit": 5000, "remaining": 17, "reset": reset}}
            })))
            .mount(&server)
            .await;

        let client = client(&server.uri(), Duration::from_secs(300));

        let quota = client.probe_rate_limit(None).await.unwrap();
        assert_eq!(quota.remaining, 17);
    }
}
