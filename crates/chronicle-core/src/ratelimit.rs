//! Per-installation rate budget bookkeeping.
//!
//! The provider reports remaining quota and a reset time on every API
//! response. This module records that bookkeeping per installation so
//! the sync worker can decide, before starting an upstream call, whether
//! to proceed or to block the current job until the window resets.

use crate::{InstallationId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Seconds added past `reset_at` when computing a job wake time, so a
/// resumed job never lands exactly on the boundary
pub const RESET_GRACE_SECONDS: u64 = 30;

/// Remaining-quota snapshot for one installation.
///
/// `last_cursor` and `last_etag` carry incremental-sync state between
/// backfill steps: the cursor marks where the previous commit walk
/// stopped, the ETag enables conditional re-fetch of the same page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRateBudget {
    pub installation_id: InstallationId,
    pub remaining: u32,
    pub reset_at: Timestamp,
    pub last_cursor: Option<String>,
    pub last_etag: Option<String>,
}

impl InstallationRateBudget {
    /// Budget with no sync state yet
    pub fn new(installation_id: InstallationId, remaining: u32, reset_at: Timestamp) -> Self {
        Self {
            installation_id,
            remaining,
            reset_at,
            last_cursor: None,
            last_etag: None,
        }
    }

    /// Check if the window has no calls left
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Wake time for a job blocked on this budget
    pub fn wake_time(&self) -> Timestamp {
        self.reset_at.add_seconds(RESET_GRACE_SECONDS)
    }
}

/// Persistence for rate budgets, keyed by installation
#[async_trait]
pub trait RateBudgetStore: Send + Sync {
    /// Fetch the budget for an installation, if one has been recorded
    async fn get(
        &self,
        installation_id: InstallationId,
    ) -> Result<Option<InstallationRateBudget>, StoreError>;

    /// Store a budget, replacing any previous record (last writer wins)
    async fn put(&self, budget: InstallationRateBudget) -> Result<(), StoreError>;
}

/// Last-writer-wins tracker over a [`RateBudgetStore`].
///
/// Updated after every upstream call that reports quota headers;
/// consulted by the sync worker before starting new upstream calls.
#[derive(Clone)]
pub struct RateLimitTracker {
    store: Arc<dyn RateBudgetStore>,
}

impl RateLimitTracker {
    /// Create a tracker over the given store
    pub fn new(store: Arc<dyn RateBudgetStore>) -> Self {
        Self { store }
    }

    /// Record the quota reported by the latest upstream response.
    ///
    /// Sync cursor and ETag state already recorded for the installation
    /// are preserved; only the quota fields are overwritten.
    pub async fn update_budget(
        &self,
        installation_id: InstallationId,
        remaining: u32,
        reset_at: Timestamp,
    ) -> Result<(), StoreError> {
        let budget = match self.store.get(installation_id).await? {
            Some(mut existing) => {
                existing.remaining = remaining;
                existing.reset_at = reset_at;
                existing
            }
            None => InstallationRateBudget::new(installation_id, remaining, reset_at),
        };

        debug!(
            installation_id = %installation_id,
            remaining,
            reset_at = %reset_at,
            "updated installation rate budget"
        );
        self.store.put(budget).await
    }

    /// Record the incremental-sync cursor and ETag after a backfill step
    pub async fn record_sync_state(
        &self,
        installation_id: InstallationId,
        cursor: Option<String>,
        etag: Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(mut budget) = self.store.get(installation_id).await? {
            budget.last_cursor = cursor;
            budget.last_etag = etag;
            self.store.put(budget).await?;
        }
        Ok(())
    }

    /// Current budget for an installation, if any has been recorded
    pub async fn budget_for(
        &self,
        installation_id: InstallationId,
    ) -> Result<Option<InstallationRateBudget>, StoreError> {
        self.store.get(installation_id).await
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
