#![no_main]

use gateway_oauth::server::oauth::pkce;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (&str, &str)| {
    let (challenge, verifier) = input;
    let _ = pkce::verify(challenge, verifier);
    if pkce::verify(&pkce::compute_s256_challenge(verifier), verifier) {
        assert!((43..=128).contains(&verifier.len()));
    }
});
