//! HMAC-SHA256 verification of inbound webhook bodies.
//!
//! The sender signs the exact raw request body with the tenant's shared
//! secret and sends the hex digest, optionally prefixed with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Older senders use this header name
pub const LEGACY_SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Returns true only if `presented` is the HMAC of `raw_body` under
    /// `secret`. Every failure is reported as `false` and logged at warn.
    pub fn verify(&self, raw_body: &[u8], presented: &str, secret: &str) -> bool {
        let presented = presented.trim();
        let presented = presented.strip_prefix(SIGNATURE_PREFIX).unwrap_or(presented);

        if presented.is_empty() {
            warn!("Webhook signature missing");
            return false;
        }

        if secret.is_empty() {
            warn!("Webhook secret not configured; rejecting signed payload");
            return false;
        }

        let expected = match hex::decode(presented) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Webhook signature is not valid hex: {}", e);
                return false;
            }
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            warn!("Webhook secret could not initialise HMAC");
            return false;
        };
        mac.update(raw_body);

        // verify_slice compares in constant time
        match mac.verify_slice(&expected) {
            Ok(()) => true,
            Err(_) => {
                warn!("Webhook signature mismatch");
                false
            }
        }
    }

    /// Hex-encoded HMAC-SHA256 of `raw_body`, without the prefix.
    #[cfg(test)]
    pub fn sign(&self, raw_body: &[u8], secret: &str) -> String {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }
}
