//! Webhook signature verification.
//!
//! Provides HMAC-SHA256 signature verification for GitHub webhooks using
//! constant-time comparison to prevent timing attacks, with support for a
//! secret-rotation window (current plus previous secret).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Webhook secret material for the rotation window.
///
/// During secret rotation the provider may still sign deliveries with
/// the outgoing secret, so verification accepts either the current or
/// the previous secret while both are configured. Secrets are zeroized
/// on drop and redacted from `Debug` output.
pub struct WebhookSecrets {
    current: Zeroizing<String>,
    previous: Option<Zeroizing<String>>,
}

impl WebhookSecrets {
    /// Construct with only the current secret
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: Zeroizing::new(current.into()),
            previous: None,
        }
    }

    /// Construct with both current and previous secrets (rotation window)
    pub fn with_previous(current: impl Into<String>, previous: impl Into<String>) -> Self {
        Self {
            current: Zeroizing::new(current.into()),
            previous: Some(Zeroizing::new(previous.into())),
        }
    }
}

impl std::fmt::Debug for WebhookSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecrets")
            .field("current", &"<REDACTED>")
            .field("previous", &self.previous.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Verifies GitHub webhook signatures using HMAC-SHA256.
///
/// The signature header format is `sha256=<hex-digest>` over the raw,
/// unparsed request body. Verification is a pure function of its inputs:
/// no logging of secrets or digests, no side effects.
pub struct SignatureVerifier {
    secrets: WebhookSecrets,
}

impl SignatureVerifier {
    /// Create a new verifier over the given secret material
    pub fn new(secrets: WebhookSecrets) -> Self {
        Self { secrets }
    }

    /// Verify a signature header against the raw payload bytes.
    ///
    /// Returns `false` (never an error) when:
    /// - the header is missing the `sha256=` prefix
    /// - the hex digest fails to decode
    /// - the decoded digest length does not match SHA-256 output
    /// - the digest matches neither the current nor the previous secret
    ///
    /// Length mismatches are an immediate rejection rather than a panic
    /// so that malformed headers arriving mid-rotation cannot crash the
    /// intake path.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> bool {
        let Some(hex_digest) = signature_header.strip_prefix("sha256=") else {
            return false;
        };

        let Ok(provided) = hex::decode(hex_digest) else {
            return false;
        };

        if self.matches_secret(payload, &provided, &self.secrets.current) {
            return true;
        }

        match &self.secrets.previous {
            Some(previous) => self.matches_secret(payload, &provided, previous),
            None => false,
        }
    }

    /// Compare the provided digest against the HMAC computed with one secret.
    fn matches_secret(&self, payload: &[u8], provided: &[u8], secret: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            // HMAC accepts keys of any length; this arm is unreachable
            // in practice but must not panic.
            Err(_) => return false,
        };
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if provided.len() != expected.len() {
            return false;
        }

        provided.ct_eq(expected.as_slice()).into()
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
