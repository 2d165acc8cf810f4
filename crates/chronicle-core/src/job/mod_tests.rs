//! Tests for the ingestion job state machine.

use super::*;
use crate::adapters::InMemoryJobStore;
use mockall::mock;
use mockall::predicate::eq;

// ============================================================================
// Helpers
// ============================================================================

fn coordinator() -> (JobCoordinator, Arc<InMemoryJobStore>) {
    let store = Arc::new(InMemoryJobStore::new());
    (JobCoordinator::new(store.clone()), store)
}

mock! {
    JobStoreMock {}

    #[async_trait]
    impl JobStore for JobStoreMock {
        async fn insert(&self, job: IngestionJob) -> Result<JobId, StoreError>;
        async fn get(&self, id: JobId) -> Result<Option<IngestionJob>, StoreError>;
        async fn patch(&self, id: JobId, patch: JobPatch) -> Result<(), StoreError>;
        async fn list(&self) -> Result<Vec<IngestionJob>, StoreError>;
    }
}

// ============================================================================
// Creation and progress tests
// ============================================================================

mod progress_tests {
    use super::*;

    /// A job started immediately is running with a start time.
    #[tokio::test]
    async fn test_create_started_immediately() {
        let (coordinator, _) = coordinator();

        let job = coordinator
            .create("acme/api", None, vec!["acme/api".to_string()], true)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(job.progress, 0);
    }

    /// Progress advances monotonically and regressions are ignored.
    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (coordinator, store) = coordinator();
        let job = coordinator.create("batch", None, vec![], true).await.unwrap();

        coordinator
            .update_progress(job.id, 40, Some(10), None)
            .await
            .unwrap();
        coordinator.update_progress(job.id, 25, None, None).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 40, "progress must never regress");
        assert_eq!(stored.events_ingested, 10);
    }

    /// Progress caps at 100 even when a caller over-reports.
    #[tokio::test]
    async fn test_progress_caps_at_hundred() {
        let (coordinator, store) = coordinator();
        let job = coordinator.create("batch", None, vec![], true).await.unwrap();

        coordinator.update_progress(job.id, 150, None, None).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 100);
    }

    /// Updating a missing job surfaces NotFound.
    #[tokio::test]
    async fn test_update_missing_job() {
        let (coordinator, _) = coordinator();

        let result = coordinator.update_progress(JobId::new(), 10, None, None).await;

        assert!(matches!(result, Err(JobError::NotFound { .. })));
    }
}

// ============================================================================
// Terminal transition tests
// ============================================================================

mod terminal_tests {
    use super::*;

    /// complete pins progress to 100 and stamps completion.
    #[tokio::test]
    async fn test_complete_finalizes_job() {
        let (coordinator, store) = coordinator();
        let job = coordinator.create("batch", None, vec![], true).await.unwrap();

        coordinator
            .complete(
                job.id,
                JobStats {
                    events_ingested: Some(250),
                    embeddings_created: Some(240),
                },
            )
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.events_ingested, 250);
        assert!(stored.completed_at.is_some());
        assert!(stored.blocked_until.is_none());
    }

    /// fail records the operator-facing message and is terminal.
    #[tokio::test]
    async fn test_fail_is_terminal() {
        let (coordinator, store) = coordinator();
        let job = coordinator.create("batch", None, vec![], true).await.unwrap();

        coordinator
            .fail(job.id, "repository no longer accessible (404)")
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(
            stored.error_message.as_deref(),
            Some("repository no longer accessible (404)")
        );

        // No transition leaves a failed job
        let result = coordinator.complete(job.id, JobStats::default()).await;
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
        let result = coordinator.update_progress(job.id, 90, None, None).await;
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
    }
}

// ============================================================================
// Block / resume tests
// ============================================================================

mod blocking_tests {
    use super::*;

    /// block persists the wake time and the exact remaining work.
    #[tokio::test]
    async fn test_block_persists_remaining_work() {
        let (coordinator, store) = coordinator();
        let job = coordinator
            .create(
                "backfill",
                None,
                vec!["acme/api".to_string(), "acme/web".to_string()],
                true,
            )
            .await
            .unwrap();
        let wake = Timestamp::now().add_seconds(900);

        coordinator
            .block(job.id, wake, vec!["acme/web".to_string()])
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Blocked);
        assert_eq!(stored.blocked_until, Some(wake));
        assert_eq!(stored.repos_remaining, vec!["acme/web".to_string()]);
    }

    /// resume clears the wake time, runs the job, and replaces the
    /// continuation list exactly.
    #[tokio::test]
    async fn test_resume_restores_running() {
        let (coordinator, store) = coordinator();
        let job = coordinator
            .create("backfill", None, vec!["acme/web".to_string()], true)
            .await
            .unwrap();
        coordinator
            .block(
                job.id,
                Timestamp::now().add_seconds(60),
                vec!["acme/web".to_string()],
            )
            .await
            .unwrap();

        coordinator
            .resume(job.id, vec!["acme/web".to_string()])
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.blocked_until, None);
        assert_eq!(stored.repos_remaining, vec!["acme/web".to_string()]);
    }

    /// Resuming a job that never started backfills started_at from
    /// created_at so elapsed-time displays stay meaningful.
    #[tokio::test]
    async fn test_resume_backfills_started_at() {
        let (coordinator, store) = coordinator();
        let job = coordinator.create("backfill", None, vec![], false).await.unwrap();
        assert!(job.started_at.is_none());

        coordinator.resume(job.id, vec![]).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.started_at, Some(stored.created_at));
    }

    /// Resuming a deleted job is a no-op: no patch call reaches the
    /// store.
    #[tokio::test]
    async fn test_resume_missing_job_issues_no_patch() {
        let mut store = MockJobStoreMock::new();
        let job_id = JobId::new();
        store
            .expect_get()
            .with(eq(job_id))
            .times(1)
            .returning(|_| Ok(None));
        store.expect_patch().never();

        let coordinator = JobCoordinator::new(Arc::new(store));

        coordinator.resume(job_id, vec![]).await.unwrap();
    }
}

// ============================================================================
// Listing tests
// ============================================================================

mod listing_tests {
    use super::*;

    /// Active listings contain exactly pending and running jobs.
    #[tokio::test]
    async fn test_list_active_excludes_settled_jobs() {
        let (coordinator, _) = coordinator();

        let pending = coordinator.create("a", None, vec![], false).await.unwrap();
        let running = coordinator.create("b", None, vec![], true).await.unwrap();
        let blocked = coordinator.create("c", None, vec![], true).await.unwrap();
        let failed = coordinator.create("d", None, vec![], true).await.unwrap();
        let completed = coordinator.create("e", None, vec![], true).await.unwrap();

        coordinator
            .block(blocked.id, Timestamp::now().add_seconds(60), vec![])
            .await
            .unwrap();
        coordinator.fail(failed.id, "bad credentials").await.unwrap();
        coordinator.complete(completed.id, JobStats::default()).await.unwrap();

        let active = coordinator.list_active().await.unwrap();
        let ids: Vec<JobId> = active.iter().map(|job| job.id).collect();

        assert_eq!(active.len(), 2);
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&running.id));
    }

    /// Only blocked jobs whose wake time has passed are due for resume.
    #[tokio::test]
    async fn test_list_due_for_resume() {
        let (coordinator, _) = coordinator();

        let due = coordinator.create("due", None, vec![], true).await.unwrap();
        let later = coordinator.create("later", None, vec![], true).await.unwrap();

        let past = Timestamp::now().subtract_duration(std::time::Duration::from_secs(10));
        coordinator.block(due.id, past, vec![]).await.unwrap();
        coordinator
            .block(later.id, Timestamp::now().add_seconds(600), vec![])
            .await
            .unwrap();

        let ready = coordinator.list_due_for_resume(Timestamp::now()).await.unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due.id);
    }
}
