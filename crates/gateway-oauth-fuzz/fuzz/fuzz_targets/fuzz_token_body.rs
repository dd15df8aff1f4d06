#![no_main]

use gateway_oauth::server::oauth::request::parse_token_body;
use libfuzzer_sys::fuzz_target;

const CONTENT_TYPES: [Option<&str>; 4] = [
    None,
    Some("application/x-www-form-urlencoded"),
    Some("application/json; charset=utf-8"),
    Some("text/plain"),
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let content_type = CONTENT_TYPES[usize::from(selector) % CONTENT_TYPES.len()];
    // Malformed bodies must surface as invalid_request, never a panic.
    if let Err(err) = parse_token_body(content_type, body) {
        assert_eq!(err.code(), "invalid_request");
    }
});
