//! Constant-time comparison and random token minting.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::{OAuthError, OAuthResult};

/// Random bytes per minted token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Compare two byte strings in constant time.
///
/// A length mismatch returns early; the length of a secret is not itself
/// treated as secret. For equal lengths the comparison touches every byte.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// [`constant_time_eq`] over UTF-8 strings.
#[must_use]
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Mint an opaque URL-safe token from the OS CSPRNG.
pub fn generate_token() -> OAuthResult<String> {
    generate_token_with_len(TOKEN_BYTES)
}

pub(crate) fn generate_token_with_len(bytes: usize) -> OAuthResult<String> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| OAuthError::internal(format!("random generator failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}
