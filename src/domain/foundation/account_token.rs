//! Obfuscated account token codec.
//!
//! Gateways that carry an account reference through their own systems
//! (e.g. the obfuscated account id on a Play Store purchase) must never see
//! a raw internal subscriber id. This codec produces a reversible, salted,
//! URL-safe token: the subscriber reference plus a truncated HMAC-SHA256 tag
//! keyed on a configured salt. Decoding verifies the tag, so a tampered or
//! garbled token yields `None` rather than a forged identity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::SubscriberRef;

type HmacSha256 = Hmac<Sha256>;

/// Length of the truncated authentication tag appended to the payload.
const TAG_LEN: usize = 10;

/// Reversible salted codec for subscriber references.
pub struct AccountTokenCodec {
    salt: SecretString,
}

impl AccountTokenCodec {
    /// Creates a codec keyed on the given salt.
    pub fn new(salt: SecretString) -> Self {
        Self { salt }
    }

    /// Encodes a subscriber reference into an opaque token.
    pub fn encode(&self, subscriber: &SubscriberRef) -> String {
        let payload = subscriber.to_string().into_bytes();
        let tag = self.tag(&payload);

        let mut bytes = payload;
        bytes.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decodes a token back into a subscriber reference.
    ///
    /// Returns `None` for malformed tokens, tag mismatches, or payloads
    /// that do not parse as a subscriber reference.
    pub fn decode(&self, token: &str) -> Option<SubscriberRef> {
        let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
        if bytes.len() <= TAG_LEN {
            return None;
        }

        let (payload, tag) = bytes.split_at(bytes.len() - TAG_LEN);
        let expected = self.tag(payload);

        if expected.ct_eq(tag).unwrap_u8() != 1 {
            return None;
        }

        std::str::from_utf8(payload).ok()?.parse().ok()
    }

    fn tag(&self, payload: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = HmacSha256::new_from_slice(self.salt.expose_secret().as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload);
        let full = mac.finalize().into_bytes();

        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(&full[..TAG_LEN]);
        out
    }
}
