//! Webhook signature verification
//!
//! Inbound webhook bodies carry an `X-Hub-Signature-256` header of the form
//! `sha256=<hex digest>`, an HMAC-SHA256 over the raw body keyed with the
//! app's webhook secret. Verification is constant-time via the Mac trait.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::OrchestratorError;
use crate::utils::hex;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify a signature header against the raw request body
pub fn verify_signature(
    secret: &SecretString,
    body: &[u8],
    header: &str,
) -> Result<(), OrchestratorError> {
    let digest = header
        .strip_prefix("sha256=")
        .ok_or(OrchestratorError::InvalidSignature)?;
    let expected = hex::decode(digest).ok_or(OrchestratorError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| OrchestratorError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| OrchestratorError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_passes() {
        let secret = SecretString::from("s3cret".to_string());
        let body = br#"{"ref":"refs/heads/main"}"#;
        let header = sign("s3cret", body);
        verify_signature(&secret, body, &header).unwrap();
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let secret = SecretString::from("s3cret".to_string());
        let body = br#"{"ref":"refs/heads/main"}"#;
        let header = sign("other", body);
        assert!(matches!(
            verify_signature(&secret, body, &header),
            Err(OrchestratorError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = SecretString::from("s3cret".to_string());
        let header = sign("s3cret", b"original");
        assert!(matches!(
            verify_signature(&secret, b"tampered", &header),
            Err(OrchestratorError::InvalidSignature)
        ));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let secret = SecretString::from("s3cret".to_string());
        for header in ["", "sha1=abcd", "sha256=", "sha256=zzzz", "abcdef"] {
            assert!(verify_signature(&secret, b"body", header).is_err());
        }
    }
}
