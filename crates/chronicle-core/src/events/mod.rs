//! # Canonical Event Module
//!
//! Converts raw provider payloads into deduplicated, immutable event
//! facts. The content hash over an event's identity fields is the sole
//! idempotency key: a fact is created once per unique hash and never
//! updated or deleted afterwards.
//!
//! Dedup-check-then-insert is not atomic against concurrent workers, so
//! every insert here follows the two-phase pattern: attempt the insert,
//! and on the store's optimistic-concurrency conflict re-read by the
//! natural key to decide whether the conflict was a duplicate (return
//! the existing id) or a genuine error (propagate).

use crate::{ActorId, EventFactId, RepoRecordId, StoreError, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use url::Url;

// ============================================================================
// Core Types
// ============================================================================

/// Deterministic fingerprint of an event's identity-defining fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash over the fact's identity fields.
    ///
    /// The inputs are the event type, the stable provider ids, and the
    /// normalized source URL. The combination is deterministic: the same
    /// real-world activity item always produces the same hash, which is
    /// what makes ingestion idempotent under redelivery and backfill
    /// overlap.
    pub fn compute(
        event_type: &str,
        gh_id: Option<u64>,
        gh_node_id: Option<&str>,
        source_url: &str,
    ) -> Self {
        let normalized_url = normalize_url(source_url);

        let mut hasher = Sha256::new();
        hasher.update(event_type.as_bytes());
        hasher.update(b"\x1f");
        if let Some(id) = gh_id {
            hasher.update(id.to_string().as_bytes());
        }
        hasher.update(b"\x1f");
        if let Some(node_id) = gh_node_id {
            hasher.update(node_id.as_bytes());
        }
        hasher.update(b"\x1f");
        hasher.update(normalized_url.as_bytes());

        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already-computed hash value
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a source URL for hashing: lowercase the host, strip any
/// trailing slash and fragment. Falls back to the raw string when the
/// URL does not parse, so hashing never fails.
fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            let mut rendered = url.to_string();
            while rendered.ends_with('/') {
                rendered.pop();
            }
            rendered
        }
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}

/// Line-change metrics attached to commit-like facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetrics {
    pub additions: u32,
    pub deletions: u32,
    pub files_changed: u32,
}

/// A deduplicated, immutable representation of one real-world activity
/// item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFact {
    pub id: EventFactId,
    pub event_type: String,
    pub gh_id: Option<u64>,
    pub gh_node_id: Option<String>,
    pub actor_id: ActorId,
    pub repo_id: RepoRecordId,
    pub occurred_at: Timestamp,
    /// Canonical human-readable text; this is what gets embedded
    pub summary: String,
    pub source_url: String,
    pub metrics: Option<ChangeMetrics>,
    pub content_hash: ContentHash,
    pub metadata: serde_json::Value,
}

/// Raw input to canonicalization, before dimension resolution
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: String,
    pub gh_id: Option<u64>,
    pub gh_node_id: Option<String>,
    pub actor_login: String,
    pub actor_gh_id: Option<u64>,
    pub repo_full_name: String,
    pub repo_gh_id: Option<u64>,
    pub occurred_at: Timestamp,
    pub summary: String,
    pub source_url: String,
    pub metrics: Option<ChangeMetrics>,
    pub metadata: serde_json::Value,
}

impl EventDraft {
    /// Compute the draft's content hash from its identity fields
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::compute(
            &self.event_type,
            self.gh_id,
            self.gh_node_id.as_deref(),
            &self.source_url,
        )
    }
}

/// Actor dimension record, keyed by provider login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: ActorId,
    pub login: String,
    pub gh_id: Option<u64>,
}

/// Repository dimension record, keyed by provider full name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: RepoRecordId,
    pub full_name: String,
    pub gh_id: Option<u64>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by canonicalization
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    #[error("Event store error: {0}")]
    Store(#[from] StoreError),

    #[error("Conflict did not resolve to an existing record for {record}")]
    UnresolvedConflict { record: String },
}

impl CanonicalizeError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::UnresolvedConflict { .. } => false,
        }
    }
}

// ============================================================================
// Core Operations (Traits)
// ============================================================================

/// Persistence for canonical event facts.
///
/// `insert` must reject a duplicate content hash with
/// [`StoreError::Conflict`]; the canonicalizer relies on that signal for
/// its race recovery.
#[async_trait]
pub trait EventFactStore: Send + Sync {
    /// Look up a fact by its content hash
    async fn find_by_content_hash(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<EventFact>, StoreError>;

    /// Insert a new fact; conflicts on content hash
    async fn insert(&self, fact: EventFact) -> Result<EventFactId, StoreError>;

    /// Fetch a fact by id
    async fn get(&self, id: EventFactId) -> Result<Option<EventFact>, StoreError>;
}

/// Persistence for actor and repository dimension records, keyed by
/// provider identity. Inserts conflict on the natural key, mirroring
/// the event fact store.
#[async_trait]
pub trait DimensionStore: Send + Sync {
    /// Look up an actor by provider login
    async fn find_actor(&self, login: &str) -> Result<Option<ActorRecord>, StoreError>;

    /// Insert an actor record; conflicts on login
    async fn insert_actor(&self, actor: ActorRecord) -> Result<ActorId, StoreError>;

    /// Look up a repository by provider full name
    async fn find_repo(&self, full_name: &str) -> Result<Option<RepoRecord>, StoreError>;

    /// Insert a repository record; conflicts on full name
    async fn insert_repo(&self, repo: RepoRecord) -> Result<RepoRecordId, StoreError>;
}

// ============================================================================
// Canonicalizer
// ============================================================================

/// Deduplicating upsert service for canonical facts and their dimensions
pub struct Canonicalizer {
    facts: Arc<dyn EventFactStore>,
    dimensions: Arc<dyn DimensionStore>,
}

impl Canonicalizer {
    /// Create a canonicalizer over the given stores
    pub fn new(facts: Arc<dyn EventFactStore>, dimensions: Arc<dyn DimensionStore>) -> Self {
        Self { facts, dimensions }
    }

    /// Upsert one canonical fact, returning the id of the stored record.
    ///
    /// The content hash is checked before every insert; an existing fact
    /// wins and its id is returned unchanged. When a concurrent worker's
    /// insert triggers the store's version-conflict signal, the hash is
    /// re-queried: a now-visible record resolves the race, anything else
    /// propagates the conflict.
    pub async fn upsert_canonical(
        &self,
        draft: EventDraft,
    ) -> Result<EventFactId, CanonicalizeError> {
        let content_hash = draft.content_hash();

        if let Some(existing) = self.facts.find_by_content_hash(&content_hash).await? {
            debug!(
                content_hash = %content_hash,
                fact_id = %existing.id,
                "canonical fact already present"
            );
            return Ok(existing.id);
        }

        let actor_id = self
            .ensure_actor(&draft.actor_login, draft.actor_gh_id)
            .await?;
        let repo_id = self
            .ensure_repo(&draft.repo_full_name, draft.repo_gh_id)
            .await?;

        let fact = EventFact {
            id: EventFactId::new(),
            event_type: draft.event_type,
            gh_id: draft.gh_id,
            gh_node_id: draft.gh_node_id,
            actor_id,
            repo_id,
            occurred_at: draft.occurred_at,
            summary: draft.summary,
            source_url: draft.source_url,
            metrics: draft.metrics,
            content_hash: content_hash.clone(),
            metadata: draft.metadata,
        };

        match self.facts.insert(fact).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_conflict() => {
                // A concurrent worker inserted the same fact between our
                // dedup check and our insert; their record wins.
                match self.facts.find_by_content_hash(&content_hash).await? {
                    Some(existing) => Ok(existing.id),
                    None => Err(CanonicalizeError::UnresolvedConflict {
                        record: format!("event_fact:{}", content_hash),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve or create the actor dimension record for a login
    async fn ensure_actor(
        &self,
        login: &str,
        gh_id: Option<u64>,
    ) -> Result<ActorId, CanonicalizeError> {
        if let Some(existing) = self.dimensions.find_actor(login).await? {
            return Ok(existing.id);
        }

        let record = ActorRecord {
            id: ActorId::new(),
            login: login.to_string(),
            gh_id,
        };

        match self.dimensions.insert_actor(record).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_conflict() => match self.dimensions.find_actor(login).await? {
                Some(existing) => Ok(existing.id),
                None => Err(CanonicalizeError::UnresolvedConflict {
                    record: format!("actor:{}", login),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve or create the repository dimension record for a full name
    async fn ensure_repo(
        &self,
        full_name: &str,
        gh_id: Option<u64>,
    ) -> Result<RepoRecordId, CanonicalizeError> {
        if let Some(existing) = self.dimensions.find_repo(full_name).await? {
            return Ok(existing.id);
        }

        let record = RepoRecord {
            id: RepoRecordId::new(),
            full_name: full_name.to_string(),
            gh_id,
        };

        match self.dimensions.insert_repo(record).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_conflict() => match self.dimensions.find_repo(full_name).await? {
                Some(existing) => Ok(existing.id),
                None => Err(CanonicalizeError::UnresolvedConflict {
                    record: format!("repo:{}", full_name),
                }),
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
