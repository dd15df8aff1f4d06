//! PKCE (Proof Key for Code Exchange) generation and verification.
//!
//! Implements the S256 method per RFC 7636. `plain` is not supported.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use super::secure::{self, constant_time_eq_str};
use crate::error::OAuthResult;

/// The only accepted `code_challenge_method`.
pub const METHOD_S256: &str = "S256";

/// Minimum verifier length (RFC 7636 §4.1).
const MIN_VERIFIER_LEN: usize = 43;
/// Maximum verifier length (RFC 7636 §4.1).
const MAX_VERIFIER_LEN: usize = 128;

/// A freshly generated verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

/// Generate a verifier from 32 random bytes and its S256 challenge.
pub fn generate() -> OAuthResult<PkcePair> {
    let verifier = secure::generate_token()?;
    let challenge = compute_s256_challenge(&verifier);
    Ok(PkcePair { verifier, challenge, method: METHOD_S256 })
}

/// Computes `BASE64URL(SHA256(code_verifier))` without padding.
#[must_use]
pub fn compute_s256_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Verify a PKCE S256 code challenge.
///
/// Returns false for any mismatch, including verifiers that are too short,
/// too long, or contain characters outside the unreserved set.
#[must_use]
pub fn verify(code_challenge: &str, code_verifier: &str) -> bool {
    if !is_well_formed_verifier(code_verifier) {
        return false;
    }
    let computed = compute_s256_challenge(code_verifier);
    constant_time_eq_str(&computed, code_challenge)
}

fn is_well_formed_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}
