//! HMAC-SHA256 verification of webhook deliveries.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::{ConfigError, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks that a delivery was signed with the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: &str) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ConfigError::InvalidSecret)?;
        Ok(Self { mac })
    }

    /// Header value a sender holding the same secret would attach to `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify `header` against `body`. The digest comparison is constant-time.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), WebhookError> {
        let digest = header
            .map(str::trim)
            .and_then(|value| value.strip_prefix(SIGNATURE_PREFIX))
            .ok_or(WebhookError::MissingSignature)?;
        let expected = hex::decode(digest).map_err(|_| WebhookError::InvalidSignature)?;

        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature)
    }
}
