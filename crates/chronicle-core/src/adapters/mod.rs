//! # Store Adapters Module
//!
//! In-memory implementations of the persistence traits.
//!
//! These adapters back unit tests, the integration suite, and local
//! development. They are intentionally faithful to the semantics the
//! pipeline depends on: content-hash inserts conflict like an
//! optimistic-concurrency store, and the embedding queue claim is a
//! single atomic compare-and-patch.

mod memory;

pub use memory::{
    InMemoryDimensionStore, InMemoryEmbeddingQueueStore, InMemoryEmbeddingStore,
    InMemoryEnvelopeStore, InMemoryEventFactStore, InMemoryJobStore, InMemoryRateBudgetStore,
};
