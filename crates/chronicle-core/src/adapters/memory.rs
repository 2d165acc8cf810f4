//! In-memory store implementations for testing and development.
//!
//! Thread-safe via coarse per-store locks; none of the methods hold a
//! lock across an await point.

use crate::embedding::{EmbeddingQueueItem, EmbeddingQueueStore, EmbeddingStore, QueueItemStatus};
use crate::events::{
    ActorRecord, ContentHash, DimensionStore, EventFact, EventFactStore, RepoRecord,
};
use crate::job::{IngestionJob, JobPatch, JobStore};
use crate::ratelimit::{InstallationRateBudget, RateBudgetStore};
use crate::webhook::{EnvelopeStore, WebhookEnvelope};
use crate::{
    ActorId, DeliveryId, EventFactId, InstallationId, JobId, QueueItemId, RepoRecordId, StoreError,
    Timestamp,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// InMemoryEnvelopeStore
// ============================================================================

struct StoredEnvelope {
    envelope: WebhookEnvelope,
    processed: bool,
}

/// Envelope store keyed by delivery ID, preserving arrival order
#[derive(Default)]
pub struct InMemoryEnvelopeStore {
    envelopes: RwLock<Vec<StoredEnvelope>>,
}

impl InMemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored envelopes, processed or not
    pub fn len(&self) -> usize {
        self.envelopes.read().expect("envelope lock poisoned").len()
    }

    /// True when no envelopes are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    async fn upsert(&self, envelope: WebhookEnvelope) -> Result<(), StoreError> {
        let mut envelopes = self.envelopes.write().expect("envelope lock poisoned");
        match envelopes
            .iter_mut()
            .find(|stored| stored.envelope.delivery_id == envelope.delivery_id)
        {
            Some(stored) => {
                // Redelivery: replace the payload, keep processing state
                stored.envelope = envelope;
            }
            None => envelopes.push(StoredEnvelope {
                envelope,
                processed: false,
            }),
        }
        Ok(())
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<WebhookEnvelope>, StoreError> {
        let envelopes = self.envelopes.read().expect("envelope lock poisoned");
        Ok(envelopes
            .iter()
            .filter(|stored| !stored.processed)
            .take(limit)
            .map(|stored| stored.envelope.clone())
            .collect())
    }

    async fn mark_processed(&self, delivery_id: &DeliveryId) -> Result<(), StoreError> {
        let mut envelopes = self.envelopes.write().expect("envelope lock poisoned");
        if let Some(stored) = envelopes
            .iter_mut()
            .find(|stored| &stored.envelope.delivery_id == delivery_id)
        {
            stored.processed = true;
        }
        Ok(())
    }
}

// ============================================================================
// InMemoryEventFactStore
// ============================================================================

/// Fact store with a unique index on content hash.
///
/// Duplicate-hash inserts are rejected with [`StoreError::Conflict`],
/// mirroring an optimistic-concurrency store's version check.
#[derive(Default)]
pub struct InMemoryEventFactStore {
    facts: RwLock<HashMap<EventFactId, EventFact>>,
}

impl InMemoryEventFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts
    pub fn len(&self) -> usize {
        self.facts.read().expect("fact lock poisoned").len()
    }

    /// True when no facts are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventFactStore for InMemoryEventFactStore {
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EventFact>, StoreError> {
        let facts = self.facts.read().expect("fact lock poisoned");
        Ok(facts
            .values()
            .find(|fact| &fact.content_hash == hash)
            .cloned())
    }

    async fn insert(&self, fact: EventFact) -> Result<EventFactId, StoreError> {
        let mut facts = self.facts.write().expect("fact lock poisoned");
        if facts
            .values()
            .any(|existing| existing.content_hash == fact.content_hash)
        {
            return Err(StoreError::Conflict {
                record: format!("event_fact:{}", fact.content_hash),
            });
        }
        let id = fact.id;
        facts.insert(id, fact);
        Ok(id)
    }

    async fn get(&self, id: EventFactId) -> Result<Option<EventFact>, StoreError> {
        let facts = self.facts.read().expect("fact lock poisoned");
        Ok(facts.get(&id).cloned())
    }
}

// ============================================================================
// InMemoryDimensionStore
// ============================================================================

/// Actor and repository dimensions with unique natural keys
#[derive(Default)]
pub struct InMemoryDimensionStore {
    actors: RwLock<HashMap<String, ActorRecord>>,
    repos: RwLock<HashMap<String, RepoRecord>>,
}

impl InMemoryDimensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored actor records
    pub fn actor_count(&self) -> usize {
        self.actors.read().expect("actor lock poisoned").len()
    }

    /// Number of stored repository records
    pub fn repo_count(&self) -> usize {
        self.repos.read().expect("repo lock poisoned").len()
    }
}

#[async_trait]
impl DimensionStore for InMemoryDimensionStore {
    async fn find_actor(&self, login: &str) -> Result<Option<ActorRecord>, StoreError> {
        let actors = self.actors.read().expect("actor lock poisoned");
        Ok(actors.get(login).cloned())
    }

    async fn insert_actor(&self, actor: ActorRecord) -> Result<ActorId, StoreError> {
        let mut actors = self.actors.write().expect("actor lock poisoned");
        if actors.contains_key(&actor.login) {
            return Err(StoreError::Conflict {
                record: format!("actor:{}", actor.login),
            });
        }
        let id = actor.id;
        actors.insert(actor.login.clone(), actor);
        Ok(id)
    }

    async fn find_repo(&self, full_name: &str) -> Result<Option<RepoRecord>, StoreError> {
        let repos = self.repos.read().expect("repo lock poisoned");
        Ok(repos.get(full_name).cloned())
    }

    async fn insert_repo(&self, repo: RepoRecord) -> Result<RepoRecordId, StoreError> {
        let mut repos = self.repos.write().expect("repo lock poisoned");
        if repos.contains_key(&repo.full_name) {
            return Err(StoreError::Conflict {
                record: format!("repo:{}", repo.full_name),
            });
        }
        let id = repo.id;
        repos.insert(repo.full_name.clone(), repo);
        Ok(id)
    }
}

// ============================================================================
// InMemoryEmbeddingQueueStore
// ============================================================================

/// Queue store whose claim is a single atomic compare-and-patch.
///
/// One mutex guards the whole map, so the status check and the
/// transition in [`EmbeddingQueueStore::claim`] cannot interleave with a
/// concurrent claim on the same item.
#[derive(Default)]
pub struct InMemoryEmbeddingQueueStore {
    items: Mutex<Vec<EmbeddingQueueItem>>,
}

impl InMemoryEmbeddingQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live queue items
    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    /// True when the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingQueueStore for InMemoryEmbeddingQueueStore {
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EmbeddingQueueItem>, StoreError> {
        let items = self.items.lock().expect("queue lock poisoned");
        Ok(items.iter().find(|item| &item.content_hash == hash).cloned())
    }

    async fn insert(&self, item: EmbeddingQueueItem) -> Result<QueueItemId, StoreError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if items
            .iter()
            .any(|existing| existing.content_hash == item.content_hash)
        {
            return Err(StoreError::Conflict {
                record: format!("embedding_queue:{}", item.content_hash),
            });
        }
        let id = item.id;
        items.push(item);
        Ok(id)
    }

    async fn claim(&self, id: QueueItemId) -> Result<Option<EmbeddingQueueItem>, StoreError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        match items.iter_mut().find(|item| item.id == id) {
            Some(item) if item.status == QueueItemStatus::Pending => {
                item.status = QueueItemStatus::Processing;
                item.attempts += 1;
                item.last_attempt_at = Some(Timestamp::now());
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reset_to_pending(&self, id: QueueItemId, attempts: u32) -> Result<(), StoreError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = QueueItemStatus::Pending;
            item.attempts = attempts;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: QueueItemId,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if let Some(item) = items.iter_mut().find(|item| item.id == id) {
            item.status = QueueItemStatus::Failed;
            item.error_message = message;
        }
        Ok(())
    }

    async fn delete(&self, id: QueueItemId) -> Result<(), StoreError> {
        let mut items = self.items.lock().expect("queue lock poisoned");
        items.retain(|item| item.id != id);
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<EmbeddingQueueItem>, StoreError> {
        let items = self.items.lock().expect("queue lock poisoned");
        Ok(items
            .iter()
            .filter(|item| item.status == QueueItemStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<EmbeddingQueueItem>, StoreError> {
        let items = self.items.lock().expect("queue lock poisoned");
        Ok(items.iter().find(|item| item.id == id).cloned())
    }
}

// ============================================================================
// InMemoryEmbeddingStore
// ============================================================================

/// Completed embeddings keyed by content hash
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    embeddings: RwLock<HashMap<String, (EventFactId, Vec<f32>)>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored embeddings
    pub fn len(&self) -> usize {
        self.embeddings.read().expect("embedding lock poisoned").len()
    }

    /// True when no embeddings are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EventFactId>, StoreError> {
        let embeddings = self.embeddings.read().expect("embedding lock poisoned");
        Ok(embeddings.get(hash.as_str()).map(|(id, _)| *id))
    }

    async fn insert(
        &self,
        event_id: EventFactId,
        content_hash: ContentHash,
        vector: Vec<f32>,
    ) -> Result<(), StoreError> {
        let mut embeddings = self.embeddings.write().expect("embedding lock poisoned");
        embeddings.insert(content_hash.as_str().to_string(), (event_id, vector));
        Ok(())
    }
}

// ============================================================================
// InMemoryJobStore
// ============================================================================

/// Job store applying partial patches under one lock
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, IngestionJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(job: &mut IngestionJob, patch: JobPatch) {
    if let Some(status) = patch.status {
        job.status = status;
    }
    if let Some(progress) = patch.progress {
        job.progress = progress;
    }
    if let Some(events_ingested) = patch.events_ingested {
        job.events_ingested = events_ingested;
    }
    if let Some(embeddings_created) = patch.embeddings_created {
        job.embeddings_created = embeddings_created;
    }
    if let Some(repos_remaining) = patch.repos_remaining {
        job.repos_remaining = repos_remaining;
    }
    if let Some(blocked_until) = patch.blocked_until {
        job.blocked_until = blocked_until;
    }
    if let Some(error_message) = patch.error_message {
        job.error_message = error_message;
    }
    if let Some(started_at) = patch.started_at {
        job.started_at = Some(started_at);
    }
    if let Some(completed_at) = patch.completed_at {
        job.completed_at = Some(completed_at);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: IngestionJob) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.write().expect("job lock poisoned");
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<IngestionJob>, StoreError> {
        let jobs = self.jobs.read().expect("job lock poisoned");
        Ok(jobs.get(&id).cloned())
    }

    async fn patch(&self, id: JobId, patch: JobPatch) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().expect("job lock poisoned");
        match jobs.get_mut(&id) {
            Some(job) => {
                apply_patch(job, patch);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                record: format!("ingestion_job:{}", id),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<IngestionJob>, StoreError> {
        let jobs = self.jobs.read().expect("job lock poisoned");
        let mut listed: Vec<IngestionJob> = jobs.values().cloned().collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }
}

// ============================================================================
// InMemoryRateBudgetStore
// ============================================================================

/// Rate budgets keyed by installation
#[derive(Default)]
pub struct InMemoryRateBudgetStore {
    budgets: RwLock<HashMap<InstallationId, InstallationRateBudget>>,
}

impl InMemoryRateBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateBudgetStore for InMemoryRateBudgetStore {
    async fn get(
        &self,
        installation_id: InstallationId,
    ) -> Result<Option<InstallationRateBudget>, StoreError> {
        let budgets = self.budgets.read().expect("budget lock poisoned");
        Ok(budgets.get(&installation_id).cloned())
    }

    async fn put(&self, budget: InstallationRateBudget) -> Result<(), StoreError> {
        let mut budgets = self.budgets.write().expect("budget lock poisoned");
        budgets.insert(budget.installation_id, budget);
        Ok(())
    }
}
