//! Tests for [`SignatureVerifier`].
//!
//! Verifies HMAC-SHA256 acceptance, the secret-rotation window, and
//! rejection of malformed headers without panics.

use super::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

// ============================================================================
// Helpers
// ============================================================================

/// Compute the HMAC-SHA256 of `payload` keyed by `secret` and return it
/// as a `sha256=<hex>` header value.
fn sign(secret: &str, payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ============================================================================
// verify tests
// ============================================================================

mod verify_tests {
    use super::*;

    /// A payload signed with the current secret must verify.
    #[test]
    fn test_current_secret_accepted() {
        let payload = b"{\"action\":\"opened\"}";
        let header = sign("current-secret", payload);

        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(verifier.verify(payload, &header));
    }

    /// The wrong secret must cause verification to fail.
    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{\"action\":\"opened\"}";
        let header = sign("other-secret", payload);

        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(!verifier.verify(payload, &header));
    }

    /// A tampered payload must fail against a signature computed over the
    /// original bytes.
    #[test]
    fn test_tampered_payload_rejected() {
        let header = sign("current-secret", b"{\"action\":\"opened\"}");

        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(!verifier.verify(b"{\"action\":\"closed\"}", &header));
    }

    /// A header without the `sha256=` prefix is rejected outright.
    #[test]
    fn test_missing_prefix_rejected() {
        let payload = b"payload";
        let header = sign("current-secret", payload);
        let no_prefix = header.strip_prefix("sha256=").unwrap();

        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(!verifier.verify(payload, no_prefix));
    }

    /// Non-hex digests must be rejected without panicking.
    #[test]
    fn test_invalid_hex_rejected() {
        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(!verifier.verify(b"payload", "sha256=not-hex-at-all"));
    }

    /// A digest of the wrong length must be rejected, not panic. Guards
    /// against crashes during rotation with truncated headers.
    #[test]
    fn test_wrong_length_digest_rejected() {
        let verifier = SignatureVerifier::new(WebhookSecrets::new("current-secret"));

        assert!(!verifier.verify(b"payload", "sha256=abcd"));
        assert!(!verifier.verify(b"payload", "sha256="));
    }
}

// ============================================================================
// Rotation window tests
// ============================================================================

mod rotation_tests {
    use super::*;

    /// A payload signed with the previous secret verifies while both
    /// secrets are configured.
    #[test]
    fn test_previous_secret_accepted_during_rotation() {
        let payload = b"{\"action\":\"opened\"}";
        let header = sign("old-secret", payload);

        let verifier =
            SignatureVerifier::new(WebhookSecrets::with_previous("new-secret", "old-secret"));

        assert!(verifier.verify(payload, &header));
    }

    /// Once the previous secret is dropped from configuration, stale
    /// signatures stop verifying.
    #[test]
    fn test_previous_secret_rejected_after_rotation_window() {
        let payload = b"{\"action\":\"opened\"}";
        let header = sign("old-secret", payload);

        let verifier = SignatureVerifier::new(WebhookSecrets::new("new-secret"));

        assert!(!verifier.verify(payload, &header));
    }

    /// The current secret still verifies while the rotation window is open.
    #[test]
    fn test_current_secret_accepted_during_rotation() {
        let payload = b"{\"action\":\"opened\"}";
        let header = sign("new-secret", payload);

        let verifier =
            SignatureVerifier::new(WebhookSecrets::with_previous("new-secret", "old-secret"));

        assert!(verifier.verify(payload, &header));
    }
}

// ============================================================================
// Debug redaction tests
// ============================================================================

mod debug_tests {
    use super::*;

    /// Secret material must never appear in Debug output.
    #[test]
    fn test_debug_redacts_secrets() {
        let secrets = WebhookSecrets::with_previous("super-secret", "older-secret");
        let rendered = format!("{:?}", secrets);

        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("older-secret"));
        assert!(rendered.contains("<REDACTED>"));
    }
}
