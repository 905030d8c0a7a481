use cloudapi::{
    ApiClient, ApiError, Config, FailureClass, HttpResponse, MockTransport, Request, Token,
    TokenListener, TransportError,
};
use std::sync::{Arc, Mutex};

const TEST_CLIENT_ID: &str = "testClientId";
const TEST_CLIENT_SECRET: &str = "testClientSecret";

const REFRESHED: &str = r#"{
    "access_token":  "fr3sh",
    "expires_in":    3600,
    "scope":         null,
    "refresh_token": "refresh"
}"#;

fn client() -> (ApiClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let config = Config::new(TEST_CLIENT_ID, TEST_CLIENT_SECRET).with_redirect_uri("redirect://me");
    (ApiClient::with_transport(config, transport.clone()), transport)
}

/// Listener recording every event, optionally handing out a replacement token
#[derive(Default)]
struct RecordingListener {
    replacement: Option<Token>,
    invalid: Mutex<Vec<Option<Token>>>,
    refreshed: Mutex<Vec<Token>>,
}

impl RecordingListener {
    fn replacing_with(token: Token) -> Self {
        RecordingListener {
            replacement: Some(token),
            ..Default::default()
        }
    }
}

impl TokenListener for RecordingListener {
    fn on_token_invalid(&self, token: Option<&Token>) -> Option<Token> {
        self.invalid.lock().unwrap().push(token.cloned());
        self.replacement.clone()
    }

    fn on_token_refreshed(&self, token: &Token) {
        self.refreshed.lock().unwrap().push(token.clone());
    }
}

fn authorization(transport: &MockTransport, index: usize) -> Option<String> {
    transport.requests()[index]
        .header("Authorization")
        .map(str::to_string)
}

#[test]
fn test_listener_called_when_token_invalidated() {
    let (api, _) = client();
    let listener = Arc::new(RecordingListener::default());
    api.set_token(Some(Token::new("access", "refresh")));
    api.set_token_listener(listener.clone());

    assert!(api.invalidate_token().is_none());
    assert_eq!(
        *listener.invalid.lock().unwrap(),
        vec![Some(Token::new("access", "refresh"))]
    );
}

#[test]
fn test_invalidate_adopts_alternative_token() {
    let (api, _) = client();
    let cached = Token::new("new", "fresh");
    api.set_token(Some(Token::new("access", "refresh")));
    api.set_token_listener(Arc::new(RecordingListener::replacing_with(cached.clone())));

    assert_eq!(api.invalidate_token().as_deref(), Some(&cached));
    assert_eq!(api.token().as_deref(), Some(&cached));
}

#[test]
fn test_listener_called_when_token_refreshed() {
    let (api, transport) = client();
    let listener = Arc::new(RecordingListener::default());
    transport.push_body(200, REFRESHED);
    api.set_token(Some(Token::new("access", "refresh")));
    api.set_token_listener(listener.clone());

    let token = api.refresh_token().unwrap();
    assert_eq!(token.access(), Some("fr3sh"));
    assert_eq!(*listener.refreshed.lock().unwrap(), vec![(*token).clone()]);
    assert_eq!(api.token(), Some(token));
}

#[test]
fn test_401_refreshes_and_retries_once() {
    let (api, transport) = client();
    let listener = Arc::new(RecordingListener::default());
    api.set_token(Some(Token::new("access", "refresh")));
    api.set_token_listener(listener.clone());
    transport
        .push_body(401, "unauthorized")
        .push_body(200, REFRESHED)
        .push_body(200, "ok");

    let response = api.get(&Request::to("/me")).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ok");
    assert_eq!(transport.request_count(), 3);
    assert_eq!(authorization(&transport, 0).as_deref(), Some("OAuth access"));
    assert!(transport.requests()[1].url.ends_with("/oauth2/token"));
    assert_eq!(authorization(&transport, 2).as_deref(), Some("OAuth fr3sh"));
    assert_eq!(transport.requests()[2].url, transport.requests()[0].url);

    assert_eq!(listener.invalid.lock().unwrap().len(), 1);
    assert_eq!(listener.refreshed.lock().unwrap().len(), 1);
    assert_eq!(api.token().unwrap().access(), Some("fr3sh"));
}

#[test]
fn test_401_uses_listener_replacement_before_refreshing() {
    let (api, transport) = client();
    api.set_token(Some(Token::new("access", "refresh")));
    api.set_token_listener(Arc::new(RecordingListener::replacing_with(Token::new(
        "cached", "fresh",
    ))));
    transport.push_body(401, "unauthorized").push_body(200, "ok");

    let response = api.get(&Request::to("/me")).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(authorization(&transport, 1).as_deref(), Some("OAuth cached"));
    assert_eq!(api.token().unwrap().access(), Some("cached"));
}

#[test]
fn test_401_without_refresh_token_is_returned() {
    let (api, transport) = client();
    api.set_token(Some(
        Token::default().with_access("access").with_scope("non-expiring"),
    ));
    transport.push_body(401, "unauthorized");

    let response = api.get(&Request::to("/me")).unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(response.text(), "unauthorized");
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn test_rejected_token_is_not_sent_again() {
    let (api, transport) = client();
    api.set_token(Some(
        Token::default().with_access("stale").with_scope("non-expiring"),
    ));
    transport.push_body(401, "unauthorized").push_body(401, "unauthorized");

    assert_eq!(api.get(&Request::to("/me")).unwrap().status, 401);
    assert_eq!(api.token().unwrap().access(), None);

    assert_eq!(api.get(&Request::to("/me")).unwrap().status, 401);
    assert_eq!(authorization(&transport, 0).as_deref(), Some("OAuth stale"));
    assert_eq!(authorization(&transport, 1).as_deref(), Some("OAuth invalidated"));
}

#[test]
fn test_401_without_any_token_is_returned() {
    let (api, transport) = client();
    transport.push_body(401, "unauthorized");

    let response = api.get(&Request::to("/me")).unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(authorization(&transport, 0).as_deref(), Some("OAuth invalidated"));
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn test_401_after_retry_is_not_retried_again() {
    let (api, transport) = client();
    api.set_token(Some(Token::new("access", "refresh")));
    transport
        .push_body(401, "unauthorized")
        .push_body(200, REFRESHED)
        .push_body(401, "still unauthorized");

    let response = api.get(&Request::to("/me")).unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(response.text(), "still unauthorized");
    assert_eq!(transport.request_count(), 3);
}

#[test]
fn test_rejected_refresh_returns_original_401() {
    let (api, transport) = client();
    api.set_token(Some(Token::new("access", "refresh")));
    transport
        .push_body(401, "unauthorized")
        .push_body(401, r#"{"error": "invalid_grant"}"#);

    let response = api.get(&Request::to("/me")).unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(response.text(), "unauthorized");
    assert_eq!(transport.request_count(), 2);

    let token = api.token().unwrap();
    assert_eq!(token.access(), None);
    assert_eq!(token.refresh(), Some("refresh"));
}

#[test]
fn test_401_with_token_override_is_returned() {
    let (api, transport) = client();
    api.set_token(Some(Token::new("access", "refresh")));
    transport.push_body(401, "unauthorized");

    let request = Request::to("/me").using_token(Token::new("other", "other-refresh"));
    let response = api.get(&request).unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn test_broken_transport_internal_failure_retried_once() {
    let (api, transport) = client();
    transport.fail_always(TransportError::new(FailureClass::Internal, "null response"));

    let err = api.get(&Request::to("/foo")).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, ApiError::BrokenTransport { attempts: 2, .. }));
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn test_broken_transport_malformed_failure_not_retried() {
    let (api, transport) = client();
    transport.fail_always(TransportError::new(FailureClass::Malformed, "connection reuse"));

    let err = api.get(&Request::to("/foo")).unwrap_err();
    assert!(matches!(err, ApiError::BrokenTransport { attempts: 1, .. }));
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn test_broken_transport_during_grant() {
    let (api, transport) = client();
    transport.fail_always(TransportError::new(FailureClass::Internal, "null response"));

    let err = api.login("foo", "bar", &[]).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(transport.request_count(), 2);
    assert!(api.token().is_none());
}

#[test]
fn test_client_credentials_scope_mismatch() {
    let (api, transport) = client();
    transport.push_body(
        200,
        r#"{"access_token": "04u7h-4cc355-70k3n", "expires_in": 3600, "scope": "loser", "refresh_token": "04u7h-r3fr35h-70k3n"}"#,
    );

    let err = api.client_credentials(&["unlimitedammo"]).unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken { .. }));
    assert!(api.token().is_none());
}

#[test]
fn test_post_and_put_send_form_body() {
    let (api, transport) = client();
    transport.set_fallback(HttpResponse::new(201));

    assert_eq!(api.post(&Request::to("/foo/something").with("a", 1)).unwrap().status, 201);
    assert_eq!(api.put(&Request::to("/foo/something").with("a", 1)).unwrap().status, 201);

    for sent in transport.requests() {
        assert_eq!(sent.path_and_query(), "/foo/something");
        let body = String::from_utf8(sent.body.unwrap()).unwrap();
        assert_eq!(body, format!("a=1&client_id={}", TEST_CLIENT_ID));
    }
}

#[test]
fn test_relative_resource_stays_on_api_host() {
    let (api, transport) = client();
    api.set_token(Some(Token::new("access", "refresh")));
    transport.set_fallback(HttpResponse::new(200));

    api.get(&Request::to("me")).unwrap();

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.url, format!("{}/me?client_id={}", api.config().api_url(), TEST_CLIENT_ID));
    assert_eq!(sent.path_and_query(), format!("/me?client_id={}", TEST_CLIENT_ID));
}
