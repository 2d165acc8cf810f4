//! # Response Cache Module
//!
//! In-process cache for upstream API responses with TTL freshness,
//! strict LRU eviction, and ETag storage for conditional re-fetch.
//!
//! Each cache is an explicitly constructed instance owned by whatever
//! component performs upstream calls; there is no global singleton and
//! no cross-process coherence. Concurrent workers each hold independent
//! caches, which is acceptable while workers are few and short-lived.

use crate::Timestamp;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Configuration and Entry Types
// ============================================================================

/// Construction-time tuning for a [`ResponseCache`]
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction kicks in
    pub max_size: usize,
    /// Freshness window applied when a caller does not supply one
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// A single cached upstream response
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    etag: Option<String>,
    stored_at: Timestamp,
    ttl: Duration,
    last_accessed: Timestamp,
}

impl CacheEntry {
    /// An entry is fresh iff `now - stored_at <= ttl`
    fn is_fresh(&self, now: Timestamp) -> bool {
        now.duration_since(self.stored_at) <= self.ttl
    }
}

/// Counters exposed through [`ResponseCache::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from cache, 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// A fetched upstream response handed back by a `get` fetcher
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub data: Value,
    pub etag: Option<String>,
}

impl FetchedResponse {
    /// Response without an ETag validator
    pub fn new(data: Value) -> Self {
        Self { data, etag: None }
    }

    /// Response carrying an ETag validator
    pub fn with_etag(data: Value, etag: impl Into<String>) -> Self {
        Self {
            data,
            etag: Some(etag.into()),
        }
    }
}

/// Options for [`ResponseCache::get`]
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Freshness window for the stored result; cache default when `None`
    pub ttl: Option<Duration>,
    /// Skip the freshness check and always call the fetcher
    pub force_refresh: bool,
}

/// Options for [`ResponseCache::set`]
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub etag: Option<String>,
}

// ============================================================================
// ResponseCache
// ============================================================================

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Outcome of a locked lookup, resolved before counters are touched
enum Lookup {
    Fresh(Value),
    Stale,
    Absent,
}

/// In-process TTL + LRU + ETag cache shielding the upstream API from
/// redundant calls.
///
/// All methods take `&self`; interior state is guarded by a mutex that
/// is never held across an await point, so the cache is safe to share
/// between concurrent tasks via `Arc`.
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    /// Create a cache with the given size and TTL configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Look up `key`, falling back to `fetcher` on a miss.
    ///
    /// - Fresh hit: touches LRU recency, counts a hit, returns the
    ///   cached payload without calling the fetcher.
    /// - Stale hit: the entry is dropped and counted as an expiration,
    ///   then the call proceeds as a miss.
    /// - Miss: counts a miss, awaits the fetcher, stores its result.
    /// - `force_refresh`: always awaits the fetcher and overwrites the
    ///   entry; eviction bookkeeping still applies on the write.
    ///
    /// Fetcher errors propagate unchanged and nothing is cached for them.
    pub async fn get<F, Fut, E>(
        &self,
        key: &str,
        options: FetchOptions,
        fetcher: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedResponse, E>>,
    {
        if !options.force_refresh {
            let now = Timestamp::now();
            let mut guard = self.inner.lock().expect("cache mutex poisoned");
            let inner = &mut *guard;

            let lookup = match inner.entries.get_mut(key) {
                Some(entry) if entry.is_fresh(now) => {
                    entry.last_accessed = now;
                    Lookup::Fresh(entry.data.clone())
                }
                Some(_) => Lookup::Stale,
                None => Lookup::Absent,
            };

            match lookup {
                Lookup::Fresh(data) => {
                    inner.hits += 1;
                    return Ok(data);
                }
                Lookup::Stale => {
                    inner.entries.remove(key);
                    inner.expirations += 1;
                    inner.misses += 1;
                }
                Lookup::Absent => {
                    inner.misses += 1;
                }
            }
            // Lock released before the fetcher runs
        } else {
            let mut inner = self.inner.lock().expect("cache mutex poisoned");
            inner.misses += 1;
        }

        let fetched = fetcher().await?;
        self.set(
            key,
            fetched.data.clone(),
            SetOptions {
                ttl: options.ttl,
                etag: fetched.etag,
            },
        );
        Ok(fetched.data)
    }

    /// Store a payload under `key`, evicting the least-recently-used
    /// entry first when the cache is at capacity and the key is new.
    pub fn set(&self, key: &str, data: Value, options: SetOptions) {
        let now = Timestamp::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.config.max_size {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                debug!(key = %oldest, "evicted least-recently-used cache entry");
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                etag: options.etag,
                stored_at: now,
                ttl: options.ttl.unwrap_or(self.config.default_ttl),
                last_accessed: now,
            },
        );
    }

    /// Check whether a fresh entry exists without touching LRU recency
    pub fn has(&self, key: &str) -> bool {
        let now = Timestamp::now();
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner
            .entries
            .get(key)
            .map(|entry| entry.is_fresh(now))
            .unwrap_or(false)
    }

    /// Read a cached payload without ever calling a fetcher.
    ///
    /// Freshness is still enforced (a stale entry is dropped and counted
    /// as an expiration) and LRU recency is still updated on a hit.
    pub fn peek(&self, key: &str) -> Option<Value> {
        let now = Timestamp::now();
        let mut guard = self.inner.lock().expect("cache mutex poisoned");
        let inner = &mut *guard;

        let lookup = match inner.entries.get_mut(key) {
            Some(entry) if entry.is_fresh(now) => {
                entry.last_accessed = now;
                Lookup::Fresh(entry.data.clone())
            }
            Some(_) => Lookup::Stale,
            None => Lookup::Absent,
        };

        match lookup {
            Lookup::Fresh(data) => Some(data),
            Lookup::Stale => {
                inner.entries.remove(key);
                inner.expirations += 1;
                None
            }
            Lookup::Absent => None,
        }
    }

    /// Return the stored ETag for `key`, if any.
    ///
    /// Stale entries still surface their ETag: the validator is exactly
    /// what a conditional re-fetch needs when freshness has lapsed.
    pub fn get_etag(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.get(key).and_then(|entry| entry.etag.clone())
    }

    /// Remove an entry; returns whether anything was removed
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.remove(key).is_some()
    }

    /// Drop every entry without resetting counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
    }

    /// Drop every stale entry; returns the number removed
    pub fn cleanup(&self) -> usize {
        let now = Timestamp::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let stale: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            inner.entries.remove(key);
            inner.expirations += 1;
        }
        stale.len()
    }

    /// Snapshot of counters and current size
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            entries: inner.entries.len(),
        }
    }
}

// ============================================================================
// Cache Key Derivation
// ============================================================================

/// Deterministic cache key builder for parameterized upstream queries.
///
/// Keys must be identical regardless of input ordering: list-valued
/// parameters are sorted, dates are normalized to RFC 3339 UTC, and the
/// canonical string is hashed so keys stay bounded in length no matter
/// how many repositories a query names.
///
/// # Examples
///
/// ```rust
/// use chronicle_core::cache::CacheKeyBuilder;
///
/// let key = CacheKeyBuilder::new("commits")
///     .list_param("repos", &["acme/api", "acme/web"])
///     .param("author", "octocat")
///     .build();
/// let same = CacheKeyBuilder::new("commits")
///     .list_param("repos", &["acme/web", "acme/api"])
///     .param("author", "octocat")
///     .build();
/// assert_eq!(key, same);
/// ```
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
    parts: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Start a key for the given query kind
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            parts: Vec::new(),
        }
    }

    /// Add a scalar parameter
    pub fn param(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.parts
            .push((name.to_string(), value.as_ref().to_string()));
        self
    }

    /// Add a list parameter; values are sorted so ordering never changes
    /// the key
    pub fn list_param<S: AsRef<str>>(mut self, name: &str, values: &[S]) -> Self {
        let mut sorted: Vec<String> = values.iter().map(|v| v.as_ref().to_string()).collect();
        sorted.sort();
        self.parts.push((name.to_string(), sorted.join(",")));
        self
    }

    /// Add a date parameter normalized to a canonical RFC 3339 UTC string
    pub fn date_param(mut self, name: &str, value: &Timestamp) -> Self {
        self.parts.push((
            name.to_string(),
            value.as_datetime().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ));
        self
    }

    /// Produce the final key: `<prefix>:<sha256-hex>`
    pub fn build(mut self) -> String {
        self.parts.sort();
        let canonical = self
            .parts
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{}:{}", self.prefix, hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
