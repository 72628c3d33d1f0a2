//! GitHub webhook signature verification (`X-Hub-Signature-256`).

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook payload against the shared secret.
///
/// The header value is expected as `sha256=<lowercase hex>`; the prefix is optional.
/// Only an exact match of the hex digest is accepted, and the digest comparison itself
/// is constant-time.
pub fn verify_signature(payload: &[u8], header_signature: &str, secret: &str) -> bool {
    if header_signature.is_empty() {
        warn!("Missing webhook signature");
        return false;
    }

    let provided = header_signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(header_signature);

    let provided_bytes = match hex_decode(provided) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Signature is not valid hex: {}", e);
            return false;
        }
    };

    // Anything but the canonical lowercase encoding is not an exact match.
    if hex::encode(&provided_bytes) != provided {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&provided_bytes).is_ok()
}

/// Compute the `sha256=<hex>` header value GitHub would send for `payload`.
#[cfg(test)]
pub(crate) fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key");
    mac.update(payload);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}
