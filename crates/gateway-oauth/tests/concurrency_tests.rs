//! Races on single-use credentials under a multi-threaded runtime.

use std::sync::Arc;

use tokio::task::JoinSet;

use gateway_oauth::server::oauth::pkce;
use gateway_oauth::server::oauth::{AuthorizationRequest, AuthorizeResponse, TokenRequest};
use gateway_oauth::{AuthorizationServer, ClientConfiguration, StoreLimits};

const REDIRECT: &str = "https://app.example/callback";
const RACERS: usize = 16;

fn server() -> AuthorizationServer {
    AuthorizationServer::new(
        ClientConfiguration::public("app", vec![REDIRECT.to_string()]),
        StoreLimits::default(),
    )
}

async fn issue_code(server: &AuthorizationServer, challenge: &str) -> String {
    let request = AuthorizationRequest {
        response_type: Some("code".into()),
        client_id: Some("app".into()),
        redirect_uri: Some(REDIRECT.into()),
        code_challenge: Some(challenge.into()),
        code_challenge_method: Some("S256".into()),
        ..AuthorizationRequest::default()
    };
    let AuthorizeResponse::Redirect(location) = server.authorize(&request).await else {
        panic!("expected redirect");
    };
    url::Url::parse(&location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

async fn race(server: &AuthorizationServer, request: TokenRequest) -> (usize, Vec<String>) {
    let request = Arc::new(request);
    let mut set = JoinSet::new();
    for _ in 0..RACERS {
        let server = server.clone();
        let request = Arc::clone(&request);
        set.spawn(async move { server.token(&request, None).await });
    }

    let mut successes = 0;
    let mut errors = Vec::new();
    while let Some(result) = set.join_next().await {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => errors.push(e.code().to_string()),
        }
    }
    (successes, errors)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_code_is_exchanged_at_most_once() {
    let server = server();
    let pair = pkce::generate().unwrap();
    let code = issue_code(&server, &pair.challenge).await;

    let request = TokenRequest {
        grant_type: Some("authorization_code".into()),
        code: Some(code),
        redirect_uri: Some(REDIRECT.into()),
        code_verifier: Some(pair.verifier),
        client_id: Some("app".into()),
        ..TokenRequest::default()
    };
    let (successes, errors) = race(&server, request).await;

    assert_eq!(successes, 1);
    assert!(errors.iter().all(|e| e == "invalid_grant"));
    assert_eq!(server.session_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_token_rotates_at_most_once() {
    let server = server();
    let pair = pkce::generate().unwrap();
    let code = issue_code(&server, &pair.challenge).await;
    let tokens = server
        .token(
            &TokenRequest {
                grant_type: Some("authorization_code".into()),
                code: Some(code),
                code_verifier: Some(pair.verifier),
                client_id: Some("app".into()),
                ..TokenRequest::default()
            },
            None,
        )
        .await
        .unwrap();

    let request = TokenRequest {
        grant_type: Some("refresh_token".into()),
        refresh_token: tokens.refresh_token,
        client_id: Some("app".into()),
        ..TokenRequest::default()
    };
    let (successes, errors) = race(&server, request).await;

    assert_eq!(successes, 1);
    assert_eq!(errors.len(), RACERS - 1);
    assert!(errors.iter().all(|e| e == "invalid_grant"));
    assert_eq!(server.session_count().await, 1);
}
