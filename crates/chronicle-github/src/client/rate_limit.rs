//! Rate limit parsing for GitHub API responses.
//!
//! GitHub reports quota in response headers on every call:
//! - `X-RateLimit-Limit`: maximum requests in the current window
//! - `X-RateLimit-Remaining`: requests left in the window
//! - `X-RateLimit-Reset`: Unix timestamp when the window resets
//!
//! The parsed snapshot feeds the core rate-limit tracker after each
//! upstream call.

use crate::error::{header_i64, header_u32};
use chronicle_core::sync::QuotaSnapshot;
use chronicle_core::Timestamp;
use reqwest::header::HeaderMap;

/// Rate limit information from GitHub API response headers
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Requests remaining in the window
    pub remaining: u32,
    /// When the window resets
    pub reset_at: Timestamp,
}

impl RateLimitInfo {
    /// Parse quota headers from a response.
    ///
    /// Returns `None` when any required header is missing or malformed;
    /// callers treat that as "no quota report", not an error.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let limit = header_u32(headers, "x-ratelimit-limit")?;
        let remaining = header_u32(headers, "x-ratelimit-remaining")?;
        let reset_secs = header_i64(headers, "x-ratelimit-reset")?;
        let reset_at = chrono::DateTime::from_timestamp(reset_secs, 0)?;

        Some(Self {
            limit,
            remaining,
            reset_at: Timestamp::from_datetime(reset_at),
        })
    }

    /// Check if the window has no requests left
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Check if remaining requests have fallen below a safety margin
    ///
    /// # Arguments
    ///
    /// * `margin` - fraction of the limit (0.0 to 1.0) kept as a buffer
    pub fn is_near_limit(&self, margin: f64) -> bool {
        let threshold = (self.limit as f64 * margin) as u32;
        self.remaining <= threshold
    }

    /// The snapshot handed to the core tracker
    pub fn quota(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            remaining: self.remaining,
            reset_at: self.reset_at,
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
