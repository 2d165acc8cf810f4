//! Error types for GitHub API operations.
//!
//! Upstream failures ultimately surface as
//! [`chronicle_core::sync::UpstreamError`] so the sync worker can decide
//! between blocking (transient) and failing (permanent) a job. This
//! module owns the classification rules.

use chronicle_core::sync::UpstreamError;
use chronicle_core::Timestamp;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

/// Authentication-related errors with retry classification
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid GitHub App credentials (non-retryable)
    #[error("Invalid GitHub App credentials")]
    InvalidCredentials,

    /// Installation not found or access revoked (non-retryable)
    #[error("Installation {installation_id} not found or access denied")]
    InstallationNotFound { installation_id: u64 },

    /// Invalid private key format or data (non-retryable)
    #[error("Invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// JWT generation failed (non-retryable)
    #[error("JWT generation failed: {message}")]
    JwtGenerationFailed { message: String },

    /// GitHub API returned an error during token exchange
    #[error("GitHub API error: {status} - {message}")]
    GitHubApiError { status: u16, message: String },

    /// Network connectivity or transport error
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl AuthError {
    /// Check if this error may succeed if retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidCredentials => false,
            Self::InstallationNotFound { .. } => false,
            Self::InvalidPrivateKey { .. } => false,
            Self::JwtGenerationFailed { .. } => false,
            Self::GitHubApiError { status, .. } => *status >= 500 || *status == 429,
            Self::NetworkError(_) => true,
        }
    }
}

impl From<AuthError> for UpstreamError {
    fn from(error: AuthError) -> Self {
        match &error {
            AuthError::NetworkError(message) => UpstreamError::Network {
                message: message.clone(),
            },
            AuthError::GitHubApiError { status, message } if *status >= 500 => {
                UpstreamError::Server {
                    status: *status,
                    message: message.clone(),
                }
            }
            _ => UpstreamError::Permanent {
                status: 401,
                message: error.to_string(),
            },
        }
    }
}

/// Map a non-success response status (plus its headers) onto the
/// pipeline's transient/permanent taxonomy.
///
/// A `403` only counts as rate limiting when the quota headers say the
/// window is spent; GitHub uses the same status for permission errors.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body_hint: &str) -> UpstreamError {
    let remaining = header_u32(headers, "x-ratelimit-remaining");
    let reset_at = header_i64(headers, "x-ratelimit-reset")
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(Timestamp::from_datetime);

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && remaining == Some(0))
    {
        return UpstreamError::RateLimited {
            reset_at: reset_at.unwrap_or_else(|| Timestamp::now().add_seconds(60)),
        };
    }

    if status.is_server_error() {
        return UpstreamError::Server {
            status: status.as_u16(),
            message: body_hint.to_string(),
        };
    }

    UpstreamError::Permanent {
        status: status.as_u16(),
        message: body_hint.to_string(),
    }
}

/// Map a transport-level failure onto the taxonomy
pub fn classify_transport(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Network {
            message: error.to_string(),
        }
    }
}

pub(crate) fn header_u32(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

pub(crate) fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
