use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

type HmacSha256 = Hmac<Sha256>;

fn digest_hex(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", digest_hex(secret, body).unwrap_or_default())
}

/// Constant-time check of an `X-Hub-Signature-256` header value.
pub fn verify_hub_signature(secret: &str, header: Option<&str>, body: &[u8]) -> bool {
    let Some(provided) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Some(expected) = digest_hex(secret, body) else {
        return false;
    };
    provided.len() == expected.len()
        && bool::from(
            provided
                .to_ascii_lowercase()
                .as_bytes()
                .ct_eq(expected.as_bytes()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_own_signature() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let sig = sign_body("s3cret", body);
        assert!(verify_hub_signature("s3cret", Some(&sig), body));
    }

    #[test]
    fn any_single_bit_flip_fails() {
        let body = b"{\"entry\":[]}".to_vec();
        let sig = sign_body("k", &body);
        for i in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body.clone();
                flipped[i] ^= 1 << bit;
                assert!(!verify_hub_signature("k", Some(&sig), &flipped));
            }
        }
    }

    #[test]
    fn missing_or_unprefixed_header_fails() {
        let sig = sign_body("k", b"x");
        assert!(!verify_hub_signature("k", None, b"x"));
        assert!(!verify_hub_signature("k", Some(&sig[7..]), b"x"));
        assert!(!verify_hub_signature("other", Some(&sig), b"x"));
    }
}
