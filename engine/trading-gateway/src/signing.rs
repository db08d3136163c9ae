//! HMAC-SHA256 request signing shared by the L2 and builder header schemes
//!
//! The venue signs `timestamp + METHOD + path + body` with the url-safe
//! base64 decoded credential secret and expects the MAC back as url-safe
//! base64.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while preparing a signing key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("secret is not valid base64")]
    InvalidSecret,
}

fn new_mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length")
}

/// Decode a credential secret. Secrets are issued url-safe, but some clients
/// re-encode them with the standard alphabet.
pub fn decode_secret(secret: &str) -> Result<Vec<u8>, SigningError> {
    URL_SAFE
        .decode(secret.trim())
        .or_else(|_| STANDARD.decode(secret.trim()))
        .map_err(|_| SigningError::InvalidSecret)
}

/// Sign a request with an already-decoded key
pub fn sign_with_key(key: &[u8], timestamp: i64, method: &str, path: &str, body: &str) -> String {
    let mut mac = new_mac(key);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());

    URL_SAFE.encode(mac.finalize().into_bytes())
}

/// Decode `secret` and sign the request
pub fn build_hmac_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, SigningError> {
    let key = decode_secret(secret)?;
    Ok(sign_with_key(&key, timestamp, method, path, body))
}

/// Sign an opaque token (session cookies) with a raw key
pub fn sign_token(key: &[u8], token: &str) -> String {
    let mut mac = new_mac(key);
    mac.update(token.as_bytes());
    URL_SAFE.encode(mac.finalize().into_bytes())
}

/// Check a token tag in constant time
pub fn verify_token(key: &[u8], token: &str, tag: &str) -> bool {
    let Ok(tag) = URL_SAFE.decode(tag) else {
        return false;
    };
    let mut mac = new_mac(key);
    mac.update(token.as_bytes());
    mac.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0LTEyMzQ=";

    #[test]
    fn test_signature_is_deterministic() {
        let a = build_hmac_signature(SECRET, 1_700_000_000, "POST", "/order", "{}").unwrap();
        let b = build_hmac_signature(SECRET, 1_700_000_000, "post", "/order", "{}").unwrap();
        assert_eq!(a, b);
        // 32-byte MAC, padded url-safe base64
        assert_eq!(a.len(), 44);
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_signature_covers_every_component() {
        let base = build_hmac_signature(SECRET, 1, "POST", "/order", "{}").unwrap();
        assert_ne!(base, build_hmac_signature(SECRET, 2, "POST", "/order", "{}").unwrap());
        assert_ne!(base, build_hmac_signature(SECRET, 1, "GET", "/order", "{}").unwrap());
        assert_ne!(base, build_hmac_signature(SECRET, 1, "POST", "/orders", "{}").unwrap());
        assert_ne!(base, build_hmac_signature(SECRET, 1, "POST", "/order", "").unwrap());
    }

    #[test]
    fn test_standard_alphabet_secret_accepted() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet, "-_8=" url-safe
        assert_eq!(decode_secret("+/8=").unwrap(), decode_secret("-_8=").unwrap());
        assert_eq!(decode_secret("not base64!"), Err(SigningError::InvalidSecret));
    }

    #[test]
    fn test_token_tag_round_trip() {
        let key = b"0123456789abcdef0123456789abcdef";
        let tag = sign_token(key, "session-id");
        assert!(verify_token(key, "session-id", &tag));
        assert!(!verify_token(key, "other-id", &tag));
        assert!(!verify_token(b"another key", "session-id", &tag));
        assert!(!verify_token(key, "session-id", "%%%"));
    }
}
