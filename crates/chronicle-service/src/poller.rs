//! Periodic scheduler driving the sync worker.
//!
//! The core pipeline defines bounded, re-invocable steps and leaves the
//! timer to its caller. This poller is that caller: every tick it
//! resumes jobs whose rate-limit pause has lapsed, drains stored
//! envelopes, advances one step of each running backfill, and pumps the
//! embedding queue. Each tick is independent; a failed step is logged
//! and retried on the next tick rather than crashing the loop.

use crate::config::PollerConfig;
use chronicle_core::{BackfillOutcome, SyncWorker};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Run the scheduler loop until the process shuts down
pub async fn run(worker: Arc<SyncWorker>, config: PollerConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        tick(&worker, &config).await;
    }
}

/// One scheduler tick
async fn tick(worker: &SyncWorker, config: &PollerConfig) {
    if let Err(e) = worker.resume_due_jobs().await {
        warn!(error = %e, "failed to resume blocked jobs");
    }

    match worker.process_envelopes(config.envelope_batch).await {
        Ok(processed) if processed > 0 => {
            debug!(processed, "drained webhook envelopes");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "envelope drain failed"),
    }

    if let Err(e) = advance_backfills(worker).await {
        warn!(error = %e, "backfill advancement failed");
    }

    match worker.drain_embedding_queue(config.embedding_batch).await {
        Ok(completed) if completed > 0 => {
            debug!(completed, "generated embeddings");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "embedding drain failed"),
    }
}

/// Step every running backfill once per tick
async fn advance_backfills(worker: &SyncWorker) -> Result<(), chronicle_core::sync::SyncError> {
    for job in worker.list_runnable_jobs().await? {
        match worker.run_backfill_step(job.id).await? {
            BackfillOutcome::Blocked { until } => {
                debug!(job_id = %job.id, until = %until, "backfill paused on rate limit");
            }
            outcome => {
                debug!(job_id = %job.id, ?outcome, "backfill step");
            }
        }
    }
    Ok(())
}
