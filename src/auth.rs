//! OAuth2 grant exchanges.

use crate::client::Config;
use crate::error::{ApiError, Result};
use crate::request::Request;
use crate::token::{scope_set, Token};
use crate::transport::{HttpResponse, Method, RetryPolicy, Transport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Path of the grant endpoint on the API host
pub const TOKEN_PATH: &str = "/oauth2/token";

pub const GRANT_TYPE: &str = "grant_type";
pub const CLIENT_ID: &str = "client_id";
pub const CLIENT_SECRET: &str = "client_secret";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const REDIRECT_URI: &str = "redirect_uri";
pub const CODE: &str = "code";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const RESPONSE_TYPE: &str = "response_type";
pub const SCOPE: &str = "scope";

/// An OAuth2 grant: the proof of identity exchanged for a token
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    Password { username: String, password: String },
    ClientCredentials,
    AuthorizationCode { code: String },
    RefreshToken { refresh_token: String },
    /// Provider specific grant, identified by its grant type URI
    Extension(String),
}

impl Grant {
    /// Value of the `grant_type` form field
    pub fn grant_type(&self) -> &str {
        match self {
            Grant::Password { .. } => "password",
            Grant::ClientCredentials => "client_credentials",
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
            Grant::Extension(grant_type) => grant_type.as_str(),
        }
    }

    fn apply(&self, request: Request, config: &Config) -> Request {
        match self {
            Grant::Password { username, password } => {
                request.with(USERNAME, username).with(PASSWORD, password)
            }
            Grant::AuthorizationCode { code } => {
                let request = request.with(CODE, code);
                match config.redirect_uri {
                    Some(ref uri) => request.with(REDIRECT_URI, uri),
                    None => request,
                }
            }
            Grant::RefreshToken { refresh_token } => request.with(REFRESH_TOKEN, refresh_token),
            Grant::ClientCredentials | Grant::Extension(_) => request,
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Grant").field(&self.grant_type()).finish()
    }
}

/// Pages of the web host starting the authorization code flow
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Connect,
    FacebookConnect,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Connect => "/connect",
            Endpoint::FacebookConnect => "/connect/via/facebook",
        }
    }
}

/// Add a `scope` parameter listing `scopes`, if there are any
pub fn add_scope(request: Request, scopes: &[&str]) -> Request {
    if scopes.is_empty() {
        request
    } else {
        request.with(SCOPE, scopes.join(" "))
    }
}

/// Check that every requested scope is part of the granted scope string
pub fn verify_scope(requested: &[&str], granted: Option<&str>) -> bool {
    let granted = scope_set(granted);
    requested
        .iter()
        .flat_map(|s| s.split_whitespace())
        .all(|s| granted.contains(s))
}

/// Performs grant exchanges against the token endpoint
#[derive(Clone)]
pub struct TokenAuthenticator {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl TokenAuthenticator {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        TokenAuthenticator {
            config,
            transport,
            retry,
        }
    }

    /// Resource owner password grant
    pub fn password_grant(&self, username: &str, password: &str, scopes: &[&str]) -> Result<Token> {
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::InvalidArgument(
                "username and password are required".to_string(),
            ));
        }
        self.request_token(
            &Grant::Password {
                username: username.to_string(),
                password: password.to_string(),
            },
            scopes,
        )
    }

    /// App-level token, not bound to any user
    pub fn client_credentials_grant(&self, scopes: &[&str]) -> Result<Token> {
        self.request_token(&Grant::ClientCredentials, scopes)
    }

    /// Exchange a one-time authorization code
    pub fn authorization_code_grant(&self, code: &str, scopes: &[&str]) -> Result<Token> {
        if code.is_empty() {
            return Err(ApiError::InvalidArgument("code is required".to_string()));
        }
        self.request_token(
            &Grant::AuthorizationCode {
                code: code.to_string(),
            },
            scopes,
        )
    }

    /// Obtain a new token from the refresh credential of `current`.
    ///
    /// Fails without any request if there is no refresh credential.
    pub fn refresh_grant(&self, current: Option<&Token>) -> Result<Token> {
        let refresh_token = current
            .and_then(Token::refresh)
            .ok_or_else(|| ApiError::IllegalState("no refresh token available".to_string()))?;
        self.request_token(
            &Grant::RefreshToken {
                refresh_token: refresh_token.to_string(),
            },
            &[],
        )
    }

    /// Provider specific grant identified by `grant_type`
    pub fn extension_grant(&self, grant_type: &str, scopes: &[&str]) -> Result<Token> {
        if grant_type.is_empty() {
            return Err(ApiError::InvalidArgument("grant type is required".to_string()));
        }
        self.request_token(&Grant::Extension(grant_type.to_string()), scopes)
    }

    /// URL of the page where the user grants access, for the authorization code flow
    pub fn authorization_url(&self, endpoint: Endpoint, scopes: &[&str]) -> Result<String> {
        let redirect_uri = self.config.redirect_uri.as_deref().ok_or_else(|| {
            ApiError::InvalidArgument("no redirect URI configured".to_string())
        })?;
        let request = Request::to(endpoint.path())
            .with(REDIRECT_URI, redirect_uri)
            .with(CLIENT_ID, &self.config.client_id)
            .with(RESPONSE_TYPE, "code");
        Ok(add_scope(request, scopes).to_url_with_base(&self.config.web_url()))
    }

    /// Run a grant exchange and verify the granted scope
    pub fn request_token(&self, grant: &Grant, scopes: &[&str]) -> Result<Token> {
        let grant_type = grant.grant_type();
        debug!(grant_type, "requesting token");

        let request = Request::to(TOKEN_PATH)
            .with(GRANT_TYPE, grant_type)
            .with(CLIENT_ID, &self.config.client_id)
            .with(CLIENT_SECRET, &self.config.client_secret);
        let request = add_scope(grant.apply(request, &self.config), scopes);

        let mut http = request.build(Method::Post, &self.config.api_url());
        http.set_header("Accept", "application/json");

        let response = self.retry.send(self.transport.as_ref(), &http)?;
        let token = parse_grant_response(&response)?;

        if !verify_scope(scopes, token.scope()) {
            warn!(grant_type, requested = %scopes.join(" "), granted = ?token.scope(), "scope not granted");
            return Err(ApiError::invalid_token(
                response.status,
                format!(
                    "could not obtain requested scope '{}' (got: '{}')",
                    scopes.join(" "),
                    token.scope().unwrap_or_default()
                ),
            ));
        }

        info!(grant_type, scope = ?token.scope(), "token granted");
        Ok(token)
    }
}

fn parse_grant_response(response: &HttpResponse) -> Result<Token> {
    let body = response.text();
    match response.status {
        200 => {
            let json: Value = serde_json::from_str(&body).map_err(|_| ApiError::ApiResponse {
                status: response.status,
                body: body.clone(),
            })?;
            Token::from_json(&json)
        }
        400 | 401 => {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|json| {
                    json.get("error_description")
                        .or_else(|| json.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            Err(ApiError::invalid_token(response.status, message))
        }
        status => Err(ApiError::ApiResponse { status, body }),
    }
}
