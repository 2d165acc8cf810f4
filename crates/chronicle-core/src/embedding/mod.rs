//! # Embedding Queue Module
//!
//! Bounded-retry work queue scheduling embedding generation for each new
//! canonical fact. The vector generation itself is an external
//! collaborator behind [`EmbeddingGenerator`]; this module owns the
//! queue semantics: at most one live item per content hash, an atomic
//! claim that makes multi-worker polling race-safe without distributed
//! locks, and a hard attempt ceiling after which items are parked as
//! terminally failed for operator inspection.

use crate::events::ContentHash;
use crate::{EventFactId, QueueItemId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempt ceiling; a failure at or past this count is terminal
pub const MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Core Types
// ============================================================================

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Failed,
}

impl QueueItemStatus {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
        }
    }
}

/// One unit of embedding work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingQueueItem {
    pub id: QueueItemId,
    pub event_id: EventFactId,
    pub content_hash: ContentHash,
    pub status: QueueItemStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<Timestamp>,
    pub error_message: Option<String>,
    pub enqueued_at: Timestamp,
}

impl EmbeddingQueueItem {
    /// Fresh pending item for a fact
    pub fn new(event_id: EventFactId, content_hash: ContentHash) -> Self {
        Self {
            id: QueueItemId::new(),
            event_id,
            content_hash,
            status: QueueItemStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            error_message: None,
            enqueued_at: Timestamp::now(),
        }
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A completed embedding already exists for the hash; nothing queued
    AlreadyEmbedded(EventFactId),
    /// A live queue item already covers the hash (possibly just reset
    /// from failed back to pending)
    Existing(QueueItemId),
    /// A new queue item was created
    Queued(QueueItemId),
}

impl EnqueueOutcome {
    /// The live queue item id, when one exists
    pub fn queue_item_id(&self) -> Option<QueueItemId> {
        match self {
            Self::AlreadyEmbedded(_) => None,
            Self::Existing(id) | Self::Queued(id) => Some(*id),
        }
    }
}

/// Result of a claim attempt against one queue item
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The item transitioned pending -> processing under this caller
    Claimed(EmbeddingQueueItem),
    /// The item was missing, already claimed, or already completed
    NotClaimed,
}

impl ClaimOutcome {
    /// Check whether this caller won the claim
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by embedding scheduling and generation
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Embedding generation failed: {message}")]
    Generation { message: String },
}

impl EmbeddingError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Generation { .. } => true,
        }
    }
}

// ============================================================================
// Core Operations (Traits)
// ============================================================================

/// Persistence for embedding queue items.
///
/// `claim` is the queue's only mutual-exclusion primitive: it must
/// perform the status check and the transition as one atomic
/// compare-and-patch, never as a read-then-write pair with a gap.
#[async_trait]
pub trait EmbeddingQueueStore: Send + Sync {
    /// Look up the live queue item for a content hash, if any
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EmbeddingQueueItem>, StoreError>;

    /// Insert a new queue item
    async fn insert(&self, item: EmbeddingQueueItem) -> Result<QueueItemId, StoreError>;

    /// Atomically transition `pending -> processing`, incrementing
    /// `attempts` and stamping `last_attempt_at`. Returns `None` when
    /// the item is missing or not pending.
    async fn claim(&self, id: QueueItemId) -> Result<Option<EmbeddingQueueItem>, StoreError>;

    /// Reset an item to pending with the given attempt count; no-op when
    /// the item is missing
    async fn reset_to_pending(&self, id: QueueItemId, attempts: u32) -> Result<(), StoreError>;

    /// Park an item as terminally failed with a message; no-op when the
    /// item is missing
    async fn mark_failed(&self, id: QueueItemId, message: Option<String>)
        -> Result<(), StoreError>;

    /// Delete an item; deleting a nonexistent item is a silent no-op
    async fn delete(&self, id: QueueItemId) -> Result<(), StoreError>;

    /// List pending items, oldest first
    async fn list_pending(&self, limit: usize) -> Result<Vec<EmbeddingQueueItem>, StoreError>;

    /// Fetch an item by id
    async fn get(&self, id: QueueItemId) -> Result<Option<EmbeddingQueueItem>, StoreError>;
}

/// Persistence for completed embeddings (the derived artifacts)
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Check whether a completed embedding already exists for a hash;
    /// returns the owning event id when it does
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EventFactId>, StoreError>;

    /// Store a completed embedding vector for a fact
    async fn insert(
        &self,
        event_id: EventFactId,
        content_hash: ContentHash,
        vector: Vec<f32>,
    ) -> Result<(), StoreError>;
}

/// External collaborator that turns canonical text into a vector
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate the embedding for one fact's canonical text
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

// ============================================================================
// EmbeddingQueue
// ============================================================================

/// Producer/consumer surface over the queue and embedding stores
pub struct EmbeddingQueue {
    queue: Arc<dyn EmbeddingQueueStore>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl EmbeddingQueue {
    /// Create a queue service over the given stores
    pub fn new(queue: Arc<dyn EmbeddingQueueStore>, embeddings: Arc<dyn EmbeddingStore>) -> Self {
        Self { queue, embeddings }
    }

    /// Schedule embedding work for a fact.
    ///
    /// No-ops when a completed embedding already exists for the hash.
    /// An existing `failed` queue item is reset to pending with
    /// `attempts = 0` (the retry re-entry point); any other live item is
    /// returned unchanged so duplicates are never created.
    pub async fn enqueue(
        &self,
        event_id: EventFactId,
        content_hash: ContentHash,
    ) -> Result<EnqueueOutcome, EmbeddingError> {
        if let Some(owner) = self.embeddings.find_by_content_hash(&content_hash).await? {
            debug!(
                content_hash = %content_hash,
                event_id = %owner,
                "embedding already exists, skipping enqueue"
            );
            return Ok(EnqueueOutcome::AlreadyEmbedded(owner));
        }

        if let Some(existing) = self.queue.find_by_content_hash(&content_hash).await? {
            if existing.status == QueueItemStatus::Failed {
                self.queue.reset_to_pending(existing.id, 0).await?;
                debug!(
                    item_id = %existing.id,
                    content_hash = %content_hash,
                    "reset failed queue item to pending"
                );
            }
            return Ok(EnqueueOutcome::Existing(existing.id));
        }

        let item = EmbeddingQueueItem::new(event_id, content_hash);
        let id = self.queue.insert(item).await?;
        Ok(EnqueueOutcome::Queued(id))
    }

    /// List pending items for a polling consumer
    pub async fn list_pending(
        &self,
        limit: usize,
    ) -> Result<Vec<EmbeddingQueueItem>, EmbeddingError> {
        Ok(self.queue.list_pending(limit).await?)
    }

    /// Idempotent claim: only a pending item transitions to processing.
    ///
    /// Concurrent callers racing on the same item see exactly one
    /// `Claimed` outcome; everyone else gets `NotClaimed` rather than an
    /// error.
    pub async fn mark_processing(&self, id: QueueItemId) -> Result<ClaimOutcome, EmbeddingError> {
        match self.queue.claim(id).await? {
            Some(item) => Ok(ClaimOutcome::Claimed(item)),
            None => Ok(ClaimOutcome::NotClaimed),
        }
    }

    /// Record a completed embedding and drop the queue item.
    ///
    /// Deleting an already-deleted item is a silent no-op, which guards
    /// concurrent double-completion.
    pub async fn complete(
        &self,
        id: QueueItemId,
        vector: Vec<f32>,
    ) -> Result<(), EmbeddingError> {
        if let Some(item) = self.queue.get(id).await? {
            self.embeddings
                .insert(item.event_id, item.content_hash, vector)
                .await?;
        }
        self.queue.delete(id).await?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Below the attempt ceiling the item returns to pending for a
    /// future poll; at the ceiling it is parked as terminally failed
    /// (kept, not deleted, so operators can inspect it). A missing item
    /// is a no-op.
    pub async fn fail(
        &self,
        id: QueueItemId,
        message: Option<String>,
    ) -> Result<(), EmbeddingError> {
        let Some(item) = self.queue.get(id).await? else {
            return Ok(());
        };

        if item.attempts >= MAX_ATTEMPTS {
            warn!(
                item_id = %id,
                attempts = item.attempts,
                "embedding work exhausted its retry budget"
            );
            self.queue.mark_failed(id, message).await?;
        } else {
            self.queue.reset_to_pending(id, item.attempts).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
