//! # Chronicle Core
//!
//! Core business logic for the Chronicle ingestion and synchronization
//! pipeline.
//!
//! This crate contains the domain logic for accepting GitHub webhook
//! deliveries, canonicalizing raw provider payloads into deduplicated
//! event facts, tracking long-running ingestion jobs, and scheduling
//! embedding generation for downstream retrieval.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations are injected at runtime
//! - Persistence, the upstream API, and embedding generation are all
//!   external collaborators behind traits
//!
//! ## Usage
//!
//! ```rust
//! use chronicle_core::{EventFactId, JobId};
//!
//! // Core identifier types are available across the system
//! let fact_id = EventFactId::new();
//! let job_id = JobId::new();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for canonical event facts
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventFactId(Ulid);

impl EventFactId {
    /// Generate a new unique fact ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventFactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventFactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventFactId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Unique identifier for ingestion jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a new unique job ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Unique identifier for embedding queue items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItemId(Ulid);

impl QueueItemId {
    /// Generate a new unique queue item ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for actor dimension records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(Ulid);

impl ActorId {
    /// Generate a new unique actor ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for repository dimension records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRecordId(Ulid);

impl RepoRecordId {
    /// Generate a new unique repository record ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RepoRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepoRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GitHub App installation identifier (numeric ID from the provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create new installation ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<u64>().map_err(|_| ParseError::InvalidFormat {
            expected: "positive integer".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self::new(id))
    }
}

/// Provider-assigned webhook delivery identifier
///
/// Unique per delivery attempt on the provider side. Redeliveries of the
/// same payload reuse the same value, which is what makes envelope
/// storage safe under at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Create new delivery ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "delivery_id".to_string(),
            });
        }

        if value.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "delivery_id".to_string(),
                max_length: 128,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "delivery_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeliveryId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing UTC datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        let duration = chrono::Duration::seconds(seconds as i64);
        Self(self.0 + duration)
    }

    /// Subtract duration from timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Error type shared by all persistence collaborators
///
/// The persistent store is an external collaborator; this enum captures
/// the signals the pipeline needs to react to, including the
/// optimistic-concurrency conflict used by the canonicalizer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write raced a concurrent write and was rejected by the store's
    /// version check. Callers must re-read by natural key and decide
    /// whether the conflict was a duplicate.
    #[error("Optimistic concurrency conflict on {record}")]
    Conflict { record: String },

    #[error("Record not found: {record}")]
    NotFound { record: String },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Store operation failed: {message}")]
    OperationFailed { message: String },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } => false,
            Self::NotFound { .. } => false,
            Self::Unavailable { .. } => true,
            Self::OperationFailed { .. } => true,
        }
    }

    /// Check if error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook intake: headers, envelopes, and signature verification
pub mod webhook;

/// In-process response cache for upstream API calls
pub mod cache;

/// Per-installation rate budget bookkeeping
pub mod ratelimit;

/// Canonical event facts and deduplicating upserts
pub mod events;

/// Bounded-retry embedding work queue
pub mod embedding;

/// Ingestion job state machine
pub mod job;

/// Asynchronous sync worker driving the pipeline
pub mod sync;

/// In-memory store adapters for tests and development
pub mod adapters;

// Re-export key types for convenience
pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use embedding::{
    ClaimOutcome, EmbeddingError, EmbeddingGenerator, EmbeddingQueue, EmbeddingQueueItem,
    EmbeddingQueueStore, EmbeddingStore, EnqueueOutcome, QueueItemStatus, MAX_ATTEMPTS,
};
pub use events::{
    Canonicalizer, CanonicalizeError, ChangeMetrics, ContentHash, DimensionStore, EventDraft,
    EventFact, EventFactStore,
};
pub use job::{IngestionJob, JobCoordinator, JobError, JobPatch, JobStats, JobStatus, JobStore};
pub use ratelimit::{InstallationRateBudget, RateBudgetStore, RateLimitTracker};
pub use sync::{BackfillOutcome, SyncError, SyncWorker, UpstreamClient, UpstreamError};
pub use webhook::{
    EnvelopeStore, SignatureVerifier, WebhookEnvelope, WebhookError, WebhookHeaders,
    WebhookSecrets,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
