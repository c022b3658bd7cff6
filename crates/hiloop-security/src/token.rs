//! HMAC-signed callback tokens (spec §4.8).
//!
//! Format: `APPROVAL_UUID:RANDOM_URLSAFE16:HMAC16`. The token authenticates
//! an external response to a specific approval without the caller holding a
//! session; tampering any of the three parts invalidates it.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Generate a callback token bound to `approval_id` with the given signing
/// secret. Mirrors `generate_callback_token` from the original
/// implementation: a 16-byte URL-safe random part plus a 16-hex-char HMAC
/// truncation over `"{approval_id}:{random_part}"`.
pub fn generate_callback_token(approval_id: Uuid, secret: &[u8]) -> String {
    let random_part = random_urlsafe_16();
    let signature = sign(approval_id, &random_part, secret);
    format!("{approval_id}:{random_part}:{signature}")
}

/// Verify a callback token and recover the approval id on success. Returns
/// `None` on any malformed input or signature mismatch — callers translate
/// that into a `ValidationError`, not a panic or exception.
pub fn verify_callback_token(token: &str, secret: &[u8]) -> Option<Uuid> {
    let mut parts = token.splitn(3, ':');
    let approval_id_str = parts.next()?;
    let random_part = parts.next()?;
    let signature = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let approval_id = Uuid::parse_str(approval_id_str).ok()?;
    let expected = sign(approval_id, random_part, secret);

    if constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
        Some(approval_id)
    } else {
        None
    }
}

fn sign(approval_id: Uuid, random_part: &str, secret: &[u8]) -> String {
    let message = format!("{approval_id}:{random_part}");
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let full = hex::encode(mac.finalize().into_bytes());
    full[..16].to_string()
}

fn random_urlsafe_16() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64_urlsafe_no_pad(&bytes)
}

/// Minimal base64url (no padding) encoder — avoids pulling in the `base64`
/// crate for sixteen bytes of randomness.
fn base64_urlsafe_no_pad(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() * 4).div_ceil(3));
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(ALPHABET[((triple >> 18) & 0x3F) as usize] as char);
        out.push(ALPHABET[((triple >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[((triple >> 6) & 0x3F) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(triple & 0x3F) as usize] as char);
        }
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let secret = b"test-secret";
        let id = Uuid::new_v4();
        let token = generate_callback_token(id, secret);
        assert_eq!(verify_callback_token(&token, secret), Some(id));
    }

    #[test]
    fn tampered_approval_id_fails() {
        let secret = b"test-secret";
        let token = generate_callback_token(Uuid::new_v4(), secret);
        let mut parts: Vec<&str> = token.splitn(3, ':').collect();
        let other_id = Uuid::new_v4().to_string();
        parts[0] = &other_id;
        let tampered = parts.join(":");
        assert_eq!(verify_callback_token(&tampered, secret), None);
    }

    #[test]
    fn tampered_signature_fails() {
        let secret = b"test-secret";
        let id = Uuid::new_v4();
        let token = generate_callback_token(id, secret);
        let tampered = format!("{token}ff");
        assert_eq!(verify_callback_token(&tampered, secret), None);
    }

    #[test]
    fn wrong_secret_fails() {
        let id = Uuid::new_v4();
        let token = generate_callback_token(id, b"secret-a");
        assert_eq!(verify_callback_token(&token, b"secret-b"), None);
    }

    #[test]
    fn malformed_token_fails() {
        assert_eq!(verify_callback_token("not-enough-parts", b"s"), None);
        assert_eq!(verify_callback_token("a:b:c:d", b"s"), None);
    }
}
