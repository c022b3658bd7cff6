//! Inbound webhook signature verification (spec §4.8).
//!
//! Fail-closed: if the signing secret is not configured, every request is
//! rejected regardless of payload. Timestamps older than the tolerance are
//! rejected to prevent replay. Signature comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
    tolerance_seconds: i64,
}

impl SignatureVerifier {
    /// `secret: None` models "signing secret absent" — the chat adapter is
    /// disabled but inbound verification still fails closed rather than
    /// accepting unsigned requests.
    pub fn new(secret: Option<Vec<u8>>) -> Self {
        Self { secret, tolerance_seconds: DEFAULT_TOLERANCE_SECONDS }
    }

    pub fn with_tolerance_seconds(mut self, tolerance_seconds: i64) -> Self {
        self.tolerance_seconds = tolerance_seconds;
        self
    }

    /// Verify a `v0:{timestamp}:{body}` HMAC-SHA256 basestring against a
    /// `v0=<hex>`-prefixed signature header, at `now` (Unix seconds).
    pub fn verify(&self, timestamp: &str, body: &[u8], signature: &str, now: i64) -> bool {
        let Some(secret) = &self.secret else {
            warn!("inbound webhook signing secret not configured; rejecting request");
            return false;
        };

        let Ok(request_time) = timestamp.parse::<i64>() else {
            return false;
        };

        if (now - request_time).abs() > self.tolerance_seconds {
            warn!(time_diff = now - request_time, "inbound webhook timestamp outside tolerance");
            return false;
        }

        let mut basestring = Vec::with_capacity(3 + timestamp.len() + 1 + body.len());
        basestring.extend_from_slice(b"v0:");
        basestring.extend_from_slice(timestamp.as_bytes());
        basestring.push(b':');
        basestring.extend_from_slice(body);

        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(&basestring);
        let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

        constant_time_eq(signature.as_bytes(), expected.as_bytes())
    }
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

    fn sign(secret: &[u8], timestamp: &str, body: &[u8]) -> String {
        let mut basestring = Vec::new();
        basestring.extend_from_slice(b"v0:");
        basestring.extend_from_slice(timestamp.as_bytes());
        basestring.push(b':');
        basestring.extend_from_slice(body);
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(&basestring);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let secret = b"whsec".to_vec();
        let verifier = SignatureVerifier::new(Some(secret.clone()));
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let body = b"{\"hello\":\"world\"}";
        let sig = sign(&secret, &ts, body);
        assert!(verifier.verify(&ts, body, &sig, now));
    }

    #[test]
    fn fails_closed_without_secret() {
        let verifier = SignatureVerifier::new(None);
        let now = 1_700_000_000i64;
        assert!(!verifier.verify(&now.to_string(), b"{}", "v0=whatever", now));
    }

    #[test]
    fn rejects_replayed_timestamp() {
        let secret = b"whsec".to_vec();
        let verifier = SignatureVerifier::new(Some(secret.clone()));
        let now = 1_700_000_000i64;
        let old_ts = (now - 400).to_string();
        let body = b"{}";
        let sig = sign(&secret, &old_ts, body);
        assert!(!verifier.verify(&old_ts, body, &sig, now));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"whsec".to_vec();
        let verifier = SignatureVerifier::new(Some(secret.clone()));
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let sig = sign(&secret, &ts, b"original");
        assert!(!verifier.verify(&ts, b"tampered", &sig, now));
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = SignatureVerifier::new(Some(b"secret-a".to_vec()));
        let now = 1_700_000_000i64;
        let ts = now.to_string();
        let sig = sign(b"secret-b", &ts, b"{}");
        assert!(!verifier.verify(&ts, b"{}", &sig, now));
    }
}
