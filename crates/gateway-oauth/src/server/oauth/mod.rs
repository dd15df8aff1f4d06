//! OAuth 2.1 authorization server for gateway authentication.
//!
//! Self-contained: a single registered client, in-memory bounded stores and
//! opaque random tokens.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code, Refresh Token and Client Credentials grants
//! - RFC 7636: PKCE (S256)
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 9728: OAuth Protected Resource Metadata

pub mod authorization;
pub mod handlers;
pub mod pkce;
pub mod request;
pub mod secure;
pub mod store;
pub mod types;

pub use authorization::{AuthorizationServer, CleanupHandle, Clock, OAuthState};
pub use types::{AuthenticatedSession, AuthorizationRequest, AuthorizeResponse, TokenRequest, TokenResponse};
