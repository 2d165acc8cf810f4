//! # Ingestion Job Module
//!
//! State machine for long-running sync operations (webhook-triggered or
//! backfill). A job persists enough state to resume after a rate-limit
//! pause or a process restart: the ordered list of repositories still to
//! walk, a wake time while blocked, and monotonic progress counters.
//!
//! ```text
//! pending -> running -> completed
//!                  \-> blocked -> running (resume)
//!                  \-> failed
//! ```
//!
//! Jobs are never deleted; terminal jobs drop out of the active listing
//! but remain as audit history.

use crate::{InstallationId, JobId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Core Types
// ============================================================================

/// Lifecycle state of an ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Blocked,
    Completed,
    Failed,
}

impl JobStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Active jobs appear in the live-progress view
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Terminal jobs accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One logical sync unit: a repository backfill or an opaque batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: JobId,
    /// Repository full name or an opaque batch label
    pub label: String,
    pub installation_id: Option<InstallationId>,
    pub status: JobStatus,
    /// 0-100; monotonically non-decreasing while running
    pub progress: u8,
    pub events_ingested: u64,
    pub embeddings_created: u64,
    /// Ordered list of work still to do; the single source of truth for
    /// what remains in a backfill
    pub repos_remaining: Vec<String>,
    /// Size of the original work list, fixed at creation; drives the
    /// progress percentage as `repos_remaining` shrinks
    pub repos_total: usize,
    /// Wake time; present iff status is blocked
    pub blocked_until: Option<Timestamp>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Partial update applied to a job record.
///
/// `None` fields are left untouched; `Some` fields overwrite. The two
/// double-option fields distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub events_ingested: Option<u64>,
    pub embeddings_created: Option<u64>,
    pub repos_remaining: Option<Vec<String>>,
    pub blocked_until: Option<Option<Timestamp>>,
    pub error_message: Option<Option<String>>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Final counter values merged in by [`JobCoordinator::complete`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStats {
    pub events_ingested: Option<u64>,
    pub embeddings_created: Option<u64>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by job coordination
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job {job_id} not found")]
    NotFound { job_id: JobId },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: &'static str,
        to: &'static str,
    },
}

// ============================================================================
// Core Operations (Traits)
// ============================================================================

/// Persistence for ingestion jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record
    async fn insert(&self, job: IngestionJob) -> Result<JobId, StoreError>;

    /// Fetch a job by id
    async fn get(&self, id: JobId) -> Result<Option<IngestionJob>, StoreError>;

    /// Apply a partial update; `NotFound` when the job does not exist
    async fn patch(&self, id: JobId, patch: JobPatch) -> Result<(), StoreError>;

    /// List jobs ordered by creation time, newest first
    async fn list(&self) -> Result<Vec<IngestionJob>, StoreError>;
}

// ============================================================================
// JobCoordinator
// ============================================================================

/// Sole mutator of [`IngestionJob`] records.
///
/// Every transition goes through one patch call so that the job record
/// is always persisted before control yields (crash between doing work
/// and persisting progress would otherwise lose or duplicate work).
pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
}

impl JobCoordinator {
    /// Create a coordinator over the given store
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Create a job; `start_immediately` marks it running with
    /// `started_at = now`
    pub async fn create(
        &self,
        label: impl Into<String>,
        installation_id: Option<InstallationId>,
        repos_remaining: Vec<String>,
        start_immediately: bool,
    ) -> Result<IngestionJob, JobError> {
        let now = Timestamp::now();
        let job = IngestionJob {
            id: JobId::new(),
            label: label.into(),
            installation_id,
            status: if start_immediately {
                JobStatus::Running
            } else {
                JobStatus::Pending
            },
            progress: 0,
            events_ingested: 0,
            embeddings_created: 0,
            repos_total: repos_remaining.len(),
            repos_remaining,
            blocked_until: None,
            error_message: None,
            created_at: now,
            started_at: start_immediately.then_some(now),
            completed_at: None,
        };

        self.store.insert(job.clone()).await?;
        info!(job_id = %job.id, label = %job.label, status = job.status.as_str(), "created ingestion job");
        Ok(job)
    }

    /// Monotonic progress patch.
    ///
    /// Progress never regresses: a caller reporting a lower value than
    /// the stored one leaves the stored value in place.
    pub async fn update_progress(
        &self,
        job_id: JobId,
        progress: u8,
        events_ingested: Option<u64>,
        embeddings_created: Option<u64>,
    ) -> Result<(), JobError> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id,
                from: job.status.as_str(),
                to: "running",
            });
        }

        let clamped = progress.min(100).max(job.progress);
        if clamped != progress.min(100) {
            debug!(
                job_id = %job_id,
                reported = progress,
                stored = job.progress,
                "ignoring progress regression"
            );
        }

        self.store
            .patch(
                job_id,
                JobPatch {
                    progress: Some(clamped),
                    events_ingested,
                    embeddings_created,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// One-patch bookkeeping update after a backfill step.
    ///
    /// The continuation list, monotonic progress, and the events counter
    /// land in a single patch so the record is consistent at every yield
    /// point.
    pub async fn record_backfill_progress(
        &self,
        job_id: JobId,
        repos_remaining: Vec<String>,
        progress: u8,
        events_ingested: u64,
    ) -> Result<(), JobError> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id,
                from: job.status.as_str(),
                to: "running",
            });
        }

        self.store
            .patch(
                job_id,
                JobPatch {
                    progress: Some(progress.min(100).max(job.progress)),
                    events_ingested: Some(events_ingested),
                    repos_remaining: Some(repos_remaining),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Terminal success: progress pinned to 100, final counters merged
    pub async fn complete(&self, job_id: JobId, stats: JobStats) -> Result<(), JobError> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id,
                from: job.status.as_str(),
                to: "completed",
            });
        }

        self.store
            .patch(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Completed),
                    progress: Some(100),
                    events_ingested: stats.events_ingested,
                    embeddings_created: stats.embeddings_created,
                    blocked_until: Some(None),
                    completed_at: Some(Timestamp::now()),
                    ..Default::default()
                },
            )
            .await?;
        info!(job_id = %job_id, "ingestion job completed");
        Ok(())
    }

    /// Terminal failure with an operator-facing message.
    ///
    /// Reserved for non-recoverable errors (bad credentials, deleted
    /// installation, repository gone); transient failures should
    /// [`JobCoordinator::block`] instead.
    pub async fn fail(&self, job_id: JobId, error_message: impl Into<String>) -> Result<(), JobError> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id,
                from: job.status.as_str(),
                to: "failed",
            });
        }

        let message = error_message.into();
        warn!(job_id = %job_id, error = %message, "ingestion job failed");
        self.store
            .patch(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Failed),
                    error_message: Some(Some(message)),
                    blocked_until: Some(None),
                    completed_at: Some(Timestamp::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Pause on rate-limit exhaustion, persisting the exact remaining
    /// work so no unit is skipped or duplicated on resume.
    pub async fn block(
        &self,
        job_id: JobId,
        blocked_until: Timestamp,
        repos_remaining: Vec<String>,
    ) -> Result<(), JobError> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                job_id,
                from: job.status.as_str(),
                to: "blocked",
            });
        }

        info!(
            job_id = %job_id,
            blocked_until = %blocked_until,
            repos_remaining = repos_remaining.len(),
            "blocking ingestion job until rate limit resets"
        );
        self.store
            .patch(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Blocked),
                    blocked_until: Some(Some(blocked_until)),
                    repos_remaining: Some(repos_remaining),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Wake a blocked job.
    ///
    /// A no-op when the job no longer exists (defensive against races
    /// with garbage collection). Otherwise issues exactly one patch:
    /// clears `blocked_until`, sets the job running, overwrites
    /// `repos_remaining` with the caller's continuation list, and
    /// backfills `started_at` from `created_at` if the job never ran, so
    /// elapsed-time displays stay meaningful. Idempotent for repeated
    /// calls with the same arguments.
    pub async fn resume(
        &self,
        job_id: JobId,
        repos_remaining: Vec<String>,
    ) -> Result<(), JobError> {
        let Some(job) = self.store.get(job_id).await? else {
            debug!(job_id = %job_id, "resume on missing job is a no-op");
            return Ok(());
        };

        self.store
            .patch(
                job_id,
                JobPatch {
                    status: Some(JobStatus::Running),
                    blocked_until: Some(None),
                    repos_remaining: Some(repos_remaining),
                    started_at: job.started_at.or(Some(job.created_at)),
                    ..Default::default()
                },
            )
            .await?;
        info!(job_id = %job_id, "resumed ingestion job");
        Ok(())
    }

    /// Fetch one job
    pub async fn get(&self, job_id: JobId) -> Result<Option<IngestionJob>, JobError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Jobs in the live-progress view: pending and running only.
    ///
    /// Blocked and terminal jobs are excluded here but retained as
    /// history in the full listing.
    pub async fn list_active(&self) -> Result<Vec<IngestionJob>, JobError> {
        let jobs = self.store.list().await?;
        Ok(jobs.into_iter().filter(|job| job.status.is_active()).collect())
    }

    /// Blocked jobs whose wake time has passed, ready for the scheduler
    /// to resume
    pub async fn list_due_for_resume(&self, now: Timestamp) -> Result<Vec<IngestionJob>, JobError> {
        let jobs = self.store.list().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| {
                job.status == JobStatus::Blocked
                    && job.blocked_until.map(|wake| wake <= now).unwrap_or(false)
            })
            .collect())
    }

    async fn require(&self, job_id: JobId) -> Result<IngestionJob, JobError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(JobError::NotFound { job_id })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
