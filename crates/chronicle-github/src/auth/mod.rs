//! GitHub App authentication.
//!
//! Chronicle authenticates as a GitHub App: a short-lived RS256 JWT
//! signed with the app's private key is exchanged for an installation
//! access token, which is what actually accompanies API calls. Tokens
//! are cached per installation and refreshed shortly before expiry.
//!
//! # GitHub requirements
//!
//! - JWTs must use RS256 (RSA with SHA-256)
//! - Maximum JWT expiration is 10 minutes from issuance
//! - `iat` is backdated 60 seconds to absorb clock drift

use crate::error::AuthError;
use chronicle_core::{InstallationId, Timestamp};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;
use zeroize::Zeroizing;

/// Seconds before expiry at which a cached token is considered stale
const TOKEN_REFRESH_MARGIN_SECONDS: u64 = 60;

/// JWT lifetime: nine minutes, safely inside GitHub's ten-minute cap
const JWT_LIFETIME_SECONDS: i64 = 540;

/// Clock-drift backdate applied to `iat`
const JWT_DRIFT_SECONDS: i64 = 60;

// ============================================================================
// Credentials
// ============================================================================

/// GitHub App identity: numeric app ID plus the RSA private key.
///
/// The key material is zeroized on drop and redacted from `Debug`.
pub struct AppCredentials {
    app_id: u64,
    private_key_pem: Zeroizing<String>,
}

impl AppCredentials {
    /// Construct credentials from an app ID and a PEM-encoded RSA key
    pub fn new(app_id: u64, private_key_pem: impl Into<String>) -> Self {
        Self {
            app_id,
            private_key_pem: Zeroizing::new(private_key_pem.into()),
        }
    }

    /// The numeric GitHub App ID
    pub fn app_id(&self) -> u64 {
        self.app_id
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("private_key_pem", &"<REDACTED>")
            .finish()
    }
}

// ============================================================================
// Token types
// ============================================================================

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Timestamp,
}

impl CachedToken {
    /// Usable tokens have more than the refresh margin left
    fn is_usable(&self) -> bool {
        Timestamp::now().add_seconds(TOKEN_REFRESH_MARGIN_SECONDS) < self.expires_at
    }
}

// ============================================================================
// AppAuthenticator
// ============================================================================

/// Generates app JWTs and exchanges them for cached installation tokens
pub struct AppAuthenticator {
    credentials: AppCredentials,
    base_url: String,
    http: reqwest::Client,
    tokens: RwLock<HashMap<InstallationId, CachedToken>>,
}

impl AppAuthenticator {
    /// Create an authenticator for the given app against an API base URL
    pub fn new(credentials: AppCredentials, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            credentials,
            base_url: base_url.into(),
            http,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Sign a short-lived RS256 app JWT.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPrivateKey`] when the PEM cannot be
    /// parsed as an RSA key, and [`AuthError::JwtGenerationFailed`] when
    /// signing fails.
    pub fn generate_app_jwt(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iat: now - JWT_DRIFT_SECONDS,
            exp: now + JWT_LIFETIME_SECONDS,
            iss: self.credentials.app_id.to_string(),
        };

        let key = EncodingKey::from_rsa_pem(self.credentials.private_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidPrivateKey {
                message: e.to_string(),
            })?;

        encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| {
            AuthError::JwtGenerationFailed {
                message: e.to_string(),
            }
        })
    }

    /// Fetch (or reuse) an installation access token.
    ///
    /// Cached tokens are reused until they come within the refresh
    /// margin of expiry; after that a fresh token is exchanged.
    pub async fn installation_token(
        &self,
        installation_id: InstallationId,
    ) -> Result<String, AuthError> {
        {
            let tokens = self.tokens.read().expect("token cache lock poisoned");
            if let Some(cached) = tokens.get(&installation_id) {
                if cached.is_usable() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let jwt = self.generate_app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, installation_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(AuthError::InstallationNotFound {
                installation_id: installation_id.as_u64(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::GitHubApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        let expires_at =
            Timestamp::from_rfc3339(&body.expires_at).unwrap_or_else(|_| Timestamp::now());

        debug!(installation_id = %installation_id, "minted installation access token");

        let mut tokens = self.tokens.write().expect("token cache lock poisoned");
        tokens.insert(
            installation_id,
            CachedToken {
                token: body.token.clone(),
                expires_at,
            },
        );

        Ok(body.token)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
