//! # Sync Worker Module
//!
//! The asynchronous half of the pipeline. Webhook intake acknowledges
//! fast and stores envelopes; this worker does the slow part out of
//! band: draining envelopes, fetching from the upstream API, feeding the
//! canonicalizer, and pumping the embedding queue.
//!
//! There is no in-process loop here. Each public method performs one
//! bounded unit of work and returns; iteration is driven by repeated
//! external invocation (a scheduler or queue consumer), and every method
//! is safe to run concurrently with another invocation of the same kind.
//! The claim semantics of the embedding queue and the idempotent upserts
//! of the canonicalizer carry the races.

use crate::embedding::{ClaimOutcome, EmbeddingGenerator, EmbeddingQueue};
use crate::events::{Canonicalizer, ChangeMetrics, EventDraft, EventFactStore};
use crate::job::{IngestionJob, JobCoordinator, JobError, JobStats, JobStatus};
use crate::ratelimit::RateLimitTracker;
use crate::webhook::{EnvelopeStore, WebhookEnvelope};
use crate::{EmbeddingError, InstallationId, JobId, StoreError, Timestamp};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Upstream Client Abstraction
// ============================================================================

/// One commit as reported by the provider
#[derive(Debug, Clone)]
pub struct RawCommit {
    pub sha: String,
    pub node_id: Option<String>,
    pub author_login: String,
    pub author_gh_id: Option<u64>,
    pub message: String,
    pub url: String,
    pub committed_at: Timestamp,
    pub additions: Option<u32>,
    pub deletions: Option<u32>,
    pub files_changed: Option<u32>,
}

/// Parameters for a commit listing call
#[derive(Debug, Clone, Default)]
pub struct CommitQuery {
    pub repo_full_name: String,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub author: Option<String>,
    /// Continuation cursor from the previous page, if any
    pub cursor: Option<String>,
}

/// Remaining-quota snapshot lifted from response headers
#[derive(Debug, Clone, Copy)]
pub struct QuotaSnapshot {
    pub remaining: u32,
    pub reset_at: Timestamp,
}

/// One page of commits plus the response metadata the pipeline tracks
#[derive(Debug, Clone, Default)]
pub struct CommitPage {
    pub commits: Vec<RawCommit>,
    pub next_cursor: Option<String>,
    pub etag: Option<String>,
    pub quota: Option<QuotaSnapshot>,
}

/// Provider user profile
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub login: String,
    pub gh_id: u64,
    pub name: Option<String>,
}

/// Errors from the upstream provider API
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Rate limit exhausted, resets at {reset_at}")]
    RateLimited { reset_at: Timestamp },

    #[error("Upstream call timed out")]
    Timeout,

    #[error("Upstream server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Permanent upstream error {status}: {message}")]
    Permanent { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },
}

impl UpstreamError {
    /// Transient errors block the job; permanent ones fail it
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout => true,
            Self::Server { .. } => true,
            Self::Network { .. } => true,
            Self::Permanent { .. } => false,
        }
    }
}

/// Outbound calls to the source-control provider.
///
/// Implementations route every call through the response cache and
/// report quota headers so the rate-limit tracker stays current. Calls
/// carry an explicit deadline; a timed-out call surfaces as
/// [`UpstreamError::Timeout`], a retryable failure.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// List commits for a repository
    async fn fetch_commits(
        &self,
        installation_id: Option<InstallationId>,
        query: &CommitQuery,
    ) -> Result<CommitPage, UpstreamError>;

    /// Fetch a user profile
    async fn fetch_profile(
        &self,
        installation_id: Option<InstallationId>,
        login: &str,
    ) -> Result<UserProfile, UpstreamError>;

    /// Probe the current rate limit without consuming meaningful quota
    async fn probe_rate_limit(
        &self,
        installation_id: Option<InstallationId>,
    ) -> Result<QuotaSnapshot, UpstreamError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by sync worker operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Canonicalization error: {0}")]
    Canonicalize(#[from] crate::events::CanonicalizeError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

// ============================================================================
// Worker Outcomes
// ============================================================================

/// What one backfill step did with its job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// One repository (or page) was ingested; more work remains
    Advanced,
    /// The rate budget ran out; the job is blocked until the given time
    Blocked { until: Timestamp },
    /// All repositories are done; the job is completed
    Completed,
    /// A permanent upstream error failed the job
    Failed,
    /// The job was not in a runnable state
    Idle,
}

// ============================================================================
// SyncWorker
// ============================================================================

/// Drives envelopes, backfills, and the embedding queue one bounded
/// step at a time
pub struct SyncWorker {
    envelopes: Arc<dyn EnvelopeStore>,
    facts: Arc<dyn EventFactStore>,
    canonicalizer: Canonicalizer,
    queue: EmbeddingQueue,
    coordinator: JobCoordinator,
    tracker: RateLimitTracker,
    upstream: Arc<dyn UpstreamClient>,
    generator: Arc<dyn EmbeddingGenerator>,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        envelopes: Arc<dyn EnvelopeStore>,
        facts: Arc<dyn EventFactStore>,
        canonicalizer: Canonicalizer,
        queue: EmbeddingQueue,
        coordinator: JobCoordinator,
        tracker: RateLimitTracker,
        upstream: Arc<dyn UpstreamClient>,
        generator: Arc<dyn EmbeddingGenerator>,
    ) -> Self {
        Self {
            envelopes,
            facts,
            canonicalizer,
            queue,
            coordinator,
            tracker,
            upstream,
            generator,
        }
    }

    /// Drain up to `limit` stored envelopes into canonical facts.
    ///
    /// Envelopes are marked processed only after their facts are stored
    /// and their embedding work is queued, so a crash mid-envelope leads
    /// to a reprocess, which the content hash dedup absorbs. A transient
    /// upstream failure stops the drain early; the untouched envelopes
    /// are picked up by the next invocation.
    #[instrument(skip(self))]
    pub async fn process_envelopes(&self, limit: usize) -> Result<usize, SyncError> {
        let envelopes = self.envelopes.list_unprocessed(limit).await?;
        let mut processed = 0;

        for envelope in envelopes {
            match self.process_one_envelope(&envelope).await {
                Ok(()) => {
                    self.envelopes.mark_processed(&envelope.delivery_id).await?;
                    processed += 1;
                }
                Err(SyncError::Upstream(e)) if e.is_transient() => {
                    debug!(
                        delivery_id = %envelope.delivery_id,
                        error = %e,
                        "transient upstream failure, leaving envelope for the next drain"
                    );
                    break;
                }
                Err(e) => {
                    // Permanent: the envelope can never process; drop it
                    // from the pending set but keep the record.
                    warn!(
                        delivery_id = %envelope.delivery_id,
                        error = %e,
                        "envelope processing failed permanently"
                    );
                    self.envelopes.mark_processed(&envelope.delivery_id).await?;
                }
            }
        }

        Ok(processed)
    }

    /// Process a single envelope according to its event type
    async fn process_one_envelope(&self, envelope: &WebhookEnvelope) -> Result<(), SyncError> {
        match envelope.event_type.as_str() {
            "push" => self.ingest_push(envelope).await,
            "pull_request" => self.ingest_pull_request(envelope).await,
            other => {
                debug!(event_type = %other, "ignoring unsupported event type");
                Ok(())
            }
        }
    }

    /// A push envelope names the repo; the commits themselves come from
    /// the upstream API so metrics and canonical URLs are authoritative.
    async fn ingest_push(&self, envelope: &WebhookEnvelope) -> Result<(), SyncError> {
        let Some(repo_full_name) = envelope
            .payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(Value::as_str)
        else {
            warn!(delivery_id = %envelope.delivery_id, "push payload without repository");
            return Ok(());
        };

        let query = CommitQuery {
            repo_full_name: repo_full_name.to_string(),
            ..Default::default()
        };
        let page = self
            .upstream
            .fetch_commits(envelope.installation_id, &query)
            .await?;

        self.record_quota(envelope.installation_id, page.quota).await?;

        let repo_gh_id = envelope
            .payload
            .get("repository")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_u64);

        for commit in &page.commits {
            self.ingest_commit(commit, repo_full_name, repo_gh_id).await?;
        }

        Ok(())
    }

    /// Pull request envelopes carry everything needed in the payload
    async fn ingest_pull_request(&self, envelope: &WebhookEnvelope) -> Result<(), SyncError> {
        let payload = &envelope.payload;
        let Some(pr) = payload.get("pull_request") else {
            warn!(delivery_id = %envelope.delivery_id, "pull_request payload without pull_request");
            return Ok(());
        };

        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("updated");
        let number = pr.get("number").and_then(Value::as_u64).unwrap_or(0);
        let title = pr.get("title").and_then(Value::as_str).unwrap_or("");
        let login = pr
            .get("user")
            .and_then(|u| u.get("login"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let draft = EventDraft {
            event_type: "pull_request".to_string(),
            gh_id: pr.get("id").and_then(Value::as_u64),
            gh_node_id: pr
                .get("node_id")
                .and_then(Value::as_str)
                .map(String::from),
            actor_login: login.to_string(),
            actor_gh_id: pr
                .get("user")
                .and_then(|u| u.get("id"))
                .and_then(Value::as_u64),
            repo_full_name: payload
                .get("repository")
                .and_then(|r| r.get("full_name"))
                .and_then(Value::as_str)
                .unwrap_or("unknown/unknown")
                .to_string(),
            repo_gh_id: payload
                .get("repository")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_u64),
            occurred_at: pr
                .get("updated_at")
                .and_then(Value::as_str)
                .and_then(|s| Timestamp::from_rfc3339(s).ok())
                .unwrap_or_else(Timestamp::now),
            summary: format!("{} {} pull request #{}: {}", login, action, number, title),
            source_url: pr
                .get("html_url")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            metrics: pr.get("additions").and_then(Value::as_u64).map(|additions| {
                ChangeMetrics {
                    additions: additions as u32,
                    deletions: pr
                        .get("deletions")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    files_changed: pr
                        .get("changed_files")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                }
            }),
            metadata: serde_json::json!({ "action": action }),
        };

        let fact_id = self.canonicalizer.upsert_canonical(draft).await?;
        if let Some(fact) = self.facts.get(fact_id).await? {
            self.queue.enqueue(fact_id, fact.content_hash).await?;
        }
        Ok(())
    }

    /// Canonicalize one upstream commit and queue its embedding
    async fn ingest_commit(
        &self,
        commit: &RawCommit,
        repo_full_name: &str,
        repo_gh_id: Option<u64>,
    ) -> Result<(), SyncError> {
        let short_sha: String = commit.sha.chars().take(7).collect();
        let first_line = commit.message.lines().next().unwrap_or("").to_string();

        let metrics = commit.additions.map(|additions| ChangeMetrics {
            additions,
            deletions: commit.deletions.unwrap_or(0),
            files_changed: commit.files_changed.unwrap_or(0),
        });

        let draft = EventDraft {
            event_type: "commit".to_string(),
            gh_id: None,
            gh_node_id: commit.node_id.clone(),
            actor_login: commit.author_login.clone(),
            actor_gh_id: commit.author_gh_id,
            repo_full_name: repo_full_name.to_string(),
            repo_gh_id,
            occurred_at: commit.committed_at,
            summary: format!(
                "{} committed {} to {}: {}",
                commit.author_login, short_sha, repo_full_name, first_line
            ),
            source_url: commit.url.clone(),
            metrics,
            metadata: serde_json::json!({ "sha": commit.sha }),
        };

        let fact_id = self.canonicalizer.upsert_canonical(draft).await?;
        if let Some(fact) = self.facts.get(fact_id).await? {
            self.queue.enqueue(fact_id, fact.content_hash).await?;
        }
        Ok(())
    }

    /// Execute one step of a backfill job: at most one commit page for
    /// the repository at the head of `repos_remaining`.
    ///
    /// The job record is patched before every return path that yields
    /// control, so a crash between steps never loses or duplicates work.
    #[instrument(skip(self))]
    pub async fn run_backfill_step(&self, job_id: JobId) -> Result<BackfillOutcome, SyncError> {
        let Some(job) = self.coordinator.get(job_id).await? else {
            return Ok(BackfillOutcome::Idle);
        };
        if job.status != JobStatus::Running {
            return Ok(BackfillOutcome::Idle);
        }

        let Some(repo) = job.repos_remaining.first().cloned() else {
            self.coordinator
                .complete(
                    job_id,
                    JobStats {
                        events_ingested: Some(job.events_ingested),
                        embeddings_created: Some(job.embeddings_created),
                    },
                )
                .await?;
            return Ok(BackfillOutcome::Completed);
        };

        // Budget check before the call, not after: exhausting the quota
        // and then asking is how secondary rate limits get tripped.
        if let Some(installation_id) = job.installation_id {
            if let Some(budget) = self.tracker.budget_for(installation_id).await? {
                if budget.is_exhausted() {
                    let until = budget.wake_time();
                    self.coordinator
                        .block(job_id, until, job.repos_remaining.clone())
                        .await?;
                    return Ok(BackfillOutcome::Blocked { until });
                }
            }
        }

        let cursor = match job.installation_id {
            Some(installation_id) => self
                .tracker
                .budget_for(installation_id)
                .await?
                .and_then(|budget| budget.last_cursor),
            None => None,
        };

        let query = CommitQuery {
            repo_full_name: repo.clone(),
            cursor,
            ..Default::default()
        };

        let page = match self.upstream.fetch_commits(job.installation_id, &query).await {
            Ok(page) => page,
            Err(UpstreamError::RateLimited { reset_at }) => {
                let until = reset_at.add_seconds(crate::ratelimit::RESET_GRACE_SECONDS);
                self.coordinator
                    .block(job_id, until, job.repos_remaining.clone())
                    .await?;
                return Ok(BackfillOutcome::Blocked { until });
            }
            Err(e) if e.is_transient() => {
                // Timeout or upstream hiccup: short pause, same work list
                let until = Timestamp::now().add_seconds(60);
                self.coordinator
                    .block(job_id, until, job.repos_remaining.clone())
                    .await?;
                return Ok(BackfillOutcome::Blocked { until });
            }
            Err(e) => {
                self.coordinator
                    .fail(job_id, format!("backfill of {} failed: {}", repo, e))
                    .await?;
                return Ok(BackfillOutcome::Failed);
            }
        };

        self.record_quota(job.installation_id, page.quota).await?;

        let repo_gh_id = None;
        let mut ingested = 0u64;
        for commit in &page.commits {
            self.ingest_commit(commit, &repo, repo_gh_id).await?;
            ingested += 1;
        }

        if let Some(installation_id) = job.installation_id {
            self.tracker
                .record_sync_state(installation_id, page.next_cursor.clone(), page.etag.clone())
                .await?;
        }

        let progress = self
            .advance_backfill_bookkeeping(&job, page.next_cursor.is_none(), ingested)
            .await?;

        info!(
            job_id = %job_id,
            repo = %repo,
            ingested,
            progress,
            "backfill step complete"
        );
        Ok(BackfillOutcome::Advanced)
    }

    /// Patch the job after a successful step: pop the repo when its
    /// pages are exhausted, bump counters, recompute progress.
    async fn advance_backfill_bookkeeping(
        &self,
        job: &IngestionJob,
        repo_done: bool,
        ingested: u64,
    ) -> Result<u8, SyncError> {
        let mut remaining = job.repos_remaining.clone();
        if repo_done && !remaining.is_empty() {
            remaining.remove(0);
        }

        let progress = if job.repos_total == 0 {
            100
        } else {
            (((job.repos_total - remaining.len()) * 100) / job.repos_total) as u8
        };

        self.coordinator
            .record_backfill_progress(job.id, remaining, progress, job.events_ingested + ingested)
            .await?;

        Ok(progress)
    }

    /// Drain up to `limit` pending embedding items.
    ///
    /// Claims are idempotent; a concurrently running drain simply loses
    /// some claims and moves on.
    #[instrument(skip(self))]
    pub async fn drain_embedding_queue(&self, limit: usize) -> Result<usize, SyncError> {
        let pending = self.queue.list_pending(limit).await?;
        let mut completed = 0;

        for item in pending {
            let ClaimOutcome::Claimed(claimed) = self.queue.mark_processing(item.id).await? else {
                continue;
            };

            let Some(fact) = self.facts.get(claimed.event_id).await? else {
                // Fact vanished from under the queue item; drop the work
                self.queue
                    .fail(claimed.id, Some("canonical fact missing".to_string()))
                    .await?;
                continue;
            };

            match self.generator.generate(&fact.summary).await {
                Ok(vector) => {
                    self.queue.complete(claimed.id, vector).await?;
                    completed += 1;
                }
                Err(e) => {
                    self.queue.fail(claimed.id, Some(e.to_string())).await?;
                }
            }
        }

        Ok(completed)
    }

    /// Running jobs the scheduler should step this tick
    pub async fn list_runnable_jobs(&self) -> Result<Vec<IngestionJob>, SyncError> {
        let active = self.coordinator.list_active().await?;
        Ok(active
            .into_iter()
            .filter(|job| job.status == JobStatus::Running)
            .collect())
    }

    /// Resume every blocked job whose wake time has passed.
    ///
    /// This is the scheduler-facing entry point implied by the blocked
    /// state: the core defines the transition, the caller owns the timer.
    #[instrument(skip(self))]
    pub async fn resume_due_jobs(&self) -> Result<usize, SyncError> {
        let due = self.coordinator.list_due_for_resume(Timestamp::now()).await?;
        let mut resumed = 0;

        for job in due {
            self.coordinator
                .resume(job.id, job.repos_remaining.clone())
                .await?;
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Record a quota snapshot against the installation's budget
    async fn record_quota(
        &self,
        installation_id: Option<InstallationId>,
        quota: Option<QuotaSnapshot>,
    ) -> Result<(), SyncError> {
        if let (Some(installation_id), Some(quota)) = (installation_id, quota) {
            self.tracker
                .update_budget(installation_id, quota.remaining, quota.reset_at)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
