//! Gateway signature primitives.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message` and return it hex-encoded (64 lower-case characters).
///
/// # Errors
///
/// Returns an error only if the HMAC implementation rejects the key length, which
/// HMAC-SHA256 never does.
pub fn hmac_sha256_hex(
    secret: &[u8],
    message: &[u8],
) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compare two strings without short-circuiting on the first differing byte.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Normalize a signature header value: trims, drops an optional `sha256=` prefix and
/// lower-cases the hex digits.
#[must_use]
pub fn normalize_signature(header: &str) -> String {
    let value = header.trim();
    value
        .strip_prefix("sha256=")
        .unwrap_or(value)
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_rfc_4231_case_2() {
        let mac = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_depends_on_every_body_byte() {
        let a = hmac_sha256_hex(b"key", br#"{"amount":100}"#).unwrap();
        let b = hmac_sha256_hex(b"key", br#"{"amount":10}"#).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_compares_fully() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn signature_headers_are_normalized() {
        assert_eq!(normalize_signature(" sha256=ABCD "), "abcd");
        assert_eq!(normalize_signature("abcd"), "abcd");
    }
}
