//! Fuzzing library for gateway-oauth.
//!
//! This crate provides fuzzing targets for the untrusted inputs of the
//! token endpoint: request bodies, HTTP Basic credentials and PKCE
//! verifiers.
//!
//! # Usage
//!
//! ```bash
//! cd crates/gateway-oauth-fuzz
//! cargo +nightly fuzz run fuzz_token_body -- -max_total_time=60
//! ```

pub use gateway_oauth::server::oauth::{pkce, request};
