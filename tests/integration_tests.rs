use cloudapi::{ApiClient, ApiError, Config, Request};
use serde::Deserialize;

// Live tests need CLOUDAPI_CLIENT_ID and CLOUDAPI_CLIENT_SECRET, and
// CLOUDAPI_USERNAME / CLOUDAPI_PASSWORD for the password grant.

fn live_client() -> ApiClient {
    let config = Config::from_env().expect("credentials not configured");
    ApiClient::new(config).expect("failed to create client")
}

fn credentials() -> (String, String) {
    (
        std::env::var("CLOUDAPI_USERNAME").expect("CLOUDAPI_USERNAME not set"),
        std::env::var("CLOUDAPI_PASSWORD").expect("CLOUDAPI_PASSWORD not set"),
    )
}

#[derive(Debug, Deserialize)]
struct Me {
    id: u64,
    username: String,
}

#[test]
#[ignore] // Run with: cargo test --test integration_tests -- --ignored
fn test_password_grant_and_me() {
    let api = live_client();
    let (username, password) = credentials();

    let token = api.login(&username, &password, &[]).expect("login failed");
    assert!(token.valid(), "expected a usable token, got {:?}", token);

    let me: Me = api
        .apply(cloudapi::Method::Get, &Request::to("/me"))
        .expect("failed to fetch /me");
    assert!(me.id > 0);

    println!("Logged in as {} ({})", me.username, me.id);
}

#[test]
#[ignore]
fn test_refresh_token() {
    let api = live_client();
    let (username, password) = credentials();

    let first = api.login(&username, &password, &[]).expect("login failed");
    let second = api.refresh_token().expect("refresh failed");
    assert_ne!(first.access(), second.access());
}

#[test]
#[ignore]
fn test_invalid_credentials() {
    let api = live_client();

    match api.login("nobody", "wrong", &[]).unwrap_err() {
        ApiError::InvalidToken { status, .. } => {
            println!("Invalid credentials rejected with {}", status);
        }
        other => panic!("expected ApiError::InvalidToken, got {:?}", other),
    }
    assert!(api.token().is_none());
}

#[test]
#[ignore]
fn test_client_credentials() {
    let api = live_client();

    let token = api.client_credentials(&[]).expect("client credentials grant failed");
    assert!(token.access().is_some());
}

#[test]
#[ignore]
fn test_resolve_user() {
    let api = live_client();
    let (username, password) = credentials();
    api.login(&username, &password, &[]).expect("login failed");

    let id = api
        .resolve("https://soundcloud.com/soundcloud")
        .expect("failed to resolve permalink");
    assert!(id > 0);
}

#[test]
#[ignore]
fn test_resolve_unknown_user() {
    let api = live_client();
    let (username, password) = credentials();
    api.login(&username, &password, &[]).expect("login failed");

    let err = api
        .resolve("https://soundcloud.com/this-user-does-not-exist-1234567890")
        .unwrap_err();
    assert!(err.is_not_found(), "expected 404, got {:?}", err);
}
