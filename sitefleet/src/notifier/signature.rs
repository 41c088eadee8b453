//! Standard Webhooks v1 HMAC-SHA256 signing.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the `webhook-signature` header value for a delivery: HMAC-SHA256
/// over `"<id>.<timestamp>.<body>"`, keyed by `secret` with any `whsec_`
/// prefix stripped, base64-encoded and prefixed `v1,`.
pub fn sign(secret: &str, id: &str, timestamp: i64, body: &str) -> String {
    let key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let key_bytes = STANDARD.decode(key).unwrap_or_else(|_| key.as_bytes().to_vec());

    let signed_content = format!("{id}.{timestamp}.{body}");
    let mut mac = HmacSha256::new_from_slice(&key_bytes).expect("HMAC accepts a key of any length");
    mac.update(signed_content.as_bytes());

    format!("v1,{}", STANDARD.encode(mac.finalize().into_bytes()))
}
