#![no_main]

use gateway_oauth::server::oauth::request::parse_basic_auth;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|header: &str| {
    match parse_basic_auth(Some(header)) {
        Ok(Some(creds)) => assert!(!creds.client_id.is_empty()),
        Ok(None) => {}
        Err(err) => assert_eq!(err.code(), "invalid_client"),
    }
});
