//! Token request decoding: body formats and HTTP Basic client credentials.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::types::{BasicCredentials, TokenRequest};
use crate::error::{OAuthError, OAuthResult};

/// Decode a token request body according to its `Content-Type`.
///
/// Form encoding is assumed when no content type is given.
pub fn parse_token_body(content_type: Option<&str>, body: &[u8]) -> OAuthResult<TokenRequest> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase());

    match mime.as_deref() {
        None | Some("application/x-www-form-urlencoded") => serde_urlencoded::from_bytes(body)
            .map_err(|_| OAuthError::invalid_request("Malformed form body")),
        Some("application/json") => {
            if body.is_empty() {
                return Ok(TokenRequest::default());
            }
            serde_json::from_slice(body)
                .map_err(|_| OAuthError::invalid_request("Malformed JSON body"))
        }
        Some(_) => Err(OAuthError::invalid_request("Unsupported content type")),
    }
}

/// Extract client credentials from an `Authorization: Basic` header.
///
/// Returns `Ok(None)` when the header is absent or uses another scheme.
/// A Basic header that cannot be decoded is an `invalid_client` failure.
pub fn parse_basic_auth(header: Option<&str>) -> OAuthResult<Option<BasicCredentials>> {
    let Some(header) = header else {
        return Ok(None);
    };
    let Some((scheme, encoded)) = header.trim().split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let malformed = || OAuthError::invalid_client("Malformed Basic authorization header");
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or_else(malformed)?;
    if client_id.is_empty() {
        return Err(malformed());
    }

    Ok(Some(BasicCredentials {
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
    }))
}
