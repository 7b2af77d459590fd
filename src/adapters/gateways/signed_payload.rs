//! JWS verification for store server notifications.
//!
//! The store signs notifications as a three-part JWS whose header carries
//! the full certificate chain (`x5c`). Verification order:
//!
//! 1. chain depth is at least three certificates,
//! 2. the chain terminates at the pinned local root,
//! 3. each link's signature checks against its issuer's public key,
//! 4. the leaf's EC public key verifies the token signature (ES256 only).
//!
//! Any failure rejects the payload before it can touch subscription state.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::Deserialize;
use x509_parser::prelude::*;

use crate::ports::GatewayError;

/// Minimum chain depth: leaf, intermediate, root.
const MIN_CHAIN_DEPTH: usize = 3;

#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    #[serde(default)]
    x5c: Vec<String>,
}

/// Verifies signed payloads against a pinned root certificate.
pub struct SignedPayloadVerifier {
    root_der: Vec<u8>,
}

impl SignedPayloadVerifier {
    /// Creates a verifier pinned to the given root certificate (DER).
    pub fn new(root_der: Vec<u8>) -> Self {
        Self { root_der }
    }

    /// Verifies a JWS and returns its decoded claims.
    ///
    /// # Errors
    ///
    /// Returns an authentication error on any chain, algorithm, or
    /// signature failure. Nothing about the payload is trusted until this
    /// returns `Ok`.
    pub fn verify(&self, token: &str) -> Result<serde_json::Value, GatewayError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(auth("malformed JWS: expected three parts")),
            };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| auth("malformed JWS header encoding"))?;
        let header: JwsHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| auth("malformed JWS header"))?;

        if header.alg != "ES256" {
            return Err(auth(format!(
                "unsupported JWS algorithm '{}'",
                header.alg
            )));
        }
        if header.x5c.len() < MIN_CHAIN_DEPTH {
            return Err(auth(format!(
                "certificate chain too short: {} < {}",
                header.x5c.len(),
                MIN_CHAIN_DEPTH
            )));
        }

        let ders = header
            .x5c
            .iter()
            .map(|c| STANDARD.decode(c))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| auth("certificate chain is not valid base64"))?;

        if ders.last().map(Vec::as_slice) != Some(self.root_der.as_slice()) {
            return Err(auth("certificate chain does not terminate at pinned root"));
        }

        let certs = ders
            .iter()
            .map(|der| parse_x509_certificate(der).map(|(_, cert)| cert))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| auth("certificate chain contains invalid DER"))?;

        for (i, cert) in certs.iter().enumerate() {
            let issuer = certs.get(i + 1).map(|c| c.public_key());
            // The last link checks the root's self-signature.
            cert.verify_signature(issuer)
                .map_err(|_| auth(format!("certificate chain link {} failed verification", i)))?;
        }

        let leaf_key = VerifyingKey::from_sec1_bytes(
            certs[0].public_key().subject_public_key.data.as_ref(),
        )
        .map_err(|_| auth("leaf certificate does not carry a P-256 key"))?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| auth("malformed JWS signature encoding"))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| auth("malformed ES256 signature"))?;

        let signed_portion = format!("{}.{}", header_b64, claims_b64);
        leaf_key
            .verify(signed_portion.as_bytes(), &signature)
            .map_err(|_| auth("JWS signature verification failed"))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| auth("malformed JWS claims encoding"))?;
        serde_json::from_slice(&claims_bytes).map_err(|_| auth("JWS claims are not valid JSON"))
    }
}

fn auth(message: impl Into<String>) -> GatewayError {
    GatewayError::authentication(message)
}
