use crate::auth::{Endpoint, TokenAuthenticator, CLIENT_ID, TOKEN_PATH};
use crate::client::Config;
use crate::error::{ApiError, Result};
use crate::listener::{NoopListener, TokenListener};
use crate::request::Request;
use crate::token::Token;
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, RetryPolicy, Transport};
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Authorization scheme used for bearer credentials
pub const OAUTH_SCHEME: &str = "OAuth";
/// Credential sent when there is no usable access token
pub const INVALIDATED_CREDENTIAL: &str = "invalidated";

/// Authorization header value for `token`
pub fn authorization_header(token: Option<&Token>) -> String {
    let credential = token
        .and_then(Token::access)
        .unwrap_or(INVALIDATED_CREDENTIAL);
    format!("{} {}", OAUTH_SCHEME, credential)
}

/// State shared by every handle derived from one client
struct Shared {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    authenticator: TokenAuthenticator,
    retry: RetryPolicy,
    token: RwLock<Option<Arc<Token>>>,
    listener: RwLock<Arc<dyn TokenListener>>,
}

/// Authenticated API client.
///
/// Cloning is cheap and clones share the token, the listener and the
/// transport. Default parameters belong to the handle: deriving a handle with
/// [`ApiClient::with_default_parameter`] never affects other handles or
/// requests already in flight.
#[derive(Clone)]
pub struct ApiClient {
    shared: Arc<Shared>,
    defaults: Arc<Vec<(String, String)>>,
}

impl ApiClient {
    /// Create a client using the default `reqwest` transport
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client on top of an arbitrary transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self::with_retry_policy(config, transport, RetryPolicy::default())
    }

    /// Create a client with an explicit transport retry policy
    pub fn with_retry_policy(config: Config, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        let config = Arc::new(config);
        let authenticator = TokenAuthenticator::new(config.clone(), transport.clone(), retry.clone());
        ApiClient {
            shared: Arc::new(Shared {
                config,
                transport,
                authenticator,
                retry,
                token: RwLock::new(None),
                listener: RwLock::new(Arc::new(NoopListener)),
            }),
            defaults: Arc::new(Vec::new()),
        }
    }

    /// Set the initial token
    pub fn with_token(self, token: Token) -> Self {
        self.set_token(Some(token));
        self
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.shared.authenticator
    }

    /// Snapshot of the current token
    pub fn token(&self) -> Option<Arc<Token>> {
        self.shared
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current token
    pub fn set_token(&self, token: Option<Token>) {
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token.map(Arc::new);
    }

    fn install(&self, token: Token) -> Arc<Token> {
        let token = Arc::new(token);
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        token
    }

    /// Install `failed` without its access credential, unless another
    /// token has been installed since it was read
    fn discard(&self, failed: &Arc<Token>) {
        let mut slot = self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(false, |current| Arc::ptr_eq(current, failed)) {
            *slot = Some(Arc::new(failed.invalidated()));
        }
    }

    pub fn set_token_listener(&self, listener: Arc<dyn TokenListener>) {
        *self
            .shared
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    pub fn clear_token_listener(&self) {
        self.set_token_listener(Arc::new(NoopListener));
    }

    fn listener(&self) -> Arc<dyn TokenListener> {
        self.shared
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle adding `name=value` to every request it executes
    pub fn with_default_parameter(&self, name: impl Into<String>, value: impl Into<String>) -> ApiClient {
        let mut defaults = (*self.defaults).clone();
        defaults.push((name.into(), value.into()));
        ApiClient {
            shared: self.shared.clone(),
            defaults: Arc::new(defaults),
        }
    }

    /// Handle without default parameters
    pub fn without_default_parameters(&self) -> ApiClient {
        ApiClient {
            shared: self.shared.clone(),
            defaults: Arc::new(Vec::new()),
        }
    }

    pub fn default_parameters(&self) -> &[(String, String)] {
        &self.defaults
    }

    /// Log in with username and password, installing the new token
    pub fn login(&self, username: &str, password: &str, scopes: &[&str]) -> Result<Arc<Token>> {
        let token = self
            .shared
            .authenticator
            .password_grant(username, password, scopes)?;
        Ok(self.install(token))
    }

    /// Obtain an app-level token, installing it as the current token
    pub fn client_credentials(&self, scopes: &[&str]) -> Result<Arc<Token>> {
        let token = self.shared.authenticator.client_credentials_grant(scopes)?;
        Ok(self.install(token))
    }

    /// Exchange an authorization code, installing the new token
    pub fn authorization_code(&self, code: &str, scopes: &[&str]) -> Result<Arc<Token>> {
        let token = self
            .shared
            .authenticator
            .authorization_code_grant(code, scopes)?;
        Ok(self.install(token))
    }

    /// Run a provider specific grant, installing the new token
    pub fn extension_grant(&self, grant_type: &str, scopes: &[&str]) -> Result<Arc<Token>> {
        let token = self
            .shared
            .authenticator
            .extension_grant(grant_type, scopes)?;
        Ok(self.install(token))
    }

    /// Refresh the current token and notify the listener
    pub fn refresh_token(&self) -> Result<Arc<Token>> {
        let current = self.token();
        let token = self.shared.authenticator.refresh_grant(current.as_deref())?;
        let token = self.install(token);
        self.listener().on_token_refreshed(&token);
        Ok(token)
    }

    /// Invalidate the current token.
    ///
    /// The listener gets a chance to supply a replacement, which is installed
    /// and returned. Otherwise the access credential is dropped (the refresh
    /// credential is kept) and `None` is returned.
    pub fn invalidate_token(&self) -> Option<Arc<Token>> {
        let current = self.token();
        if let Some(replacement) = self.listener().on_token_invalid(current.as_deref()) {
            return Some(self.install(replacement));
        }
        if let Some(current) = current {
            self.install(current.invalidated());
        }
        None
    }

    /// URL of the authorization page for the authorization code flow
    pub fn authorization_code_url(&self, endpoint: Endpoint, scopes: &[&str]) -> Result<String> {
        self.shared.authenticator.authorization_url(endpoint, scopes)
    }

    /// Add the configured client id unless the request carries its own
    pub fn add_client_id(&self, request: Request) -> Request {
        if request.has_param(CLIENT_ID) {
            request
        } else {
            request.with(CLIENT_ID, &self.shared.config.client_id)
        }
    }

    /// Absolute URL of `request` on the API host or the web host
    pub fn get_uri(&self, request: &Request, api_host: bool, ssl: bool) -> String {
        request.to_url_with_base(&self.shared.config.env.base_url(api_host, ssl))
    }

    /// Render `request` for the wire: default parameters, client id and the
    /// Authorization header for `token`.
    pub fn prepare(&self, method: Method, request: &Request, token: Option<&Token>) -> HttpRequest {
        let mut request = request.clone();
        for (name, value) in self.defaults.iter() {
            if !request.has_param(name) {
                request = request.with(name.as_str(), value);
            }
        }
        let request = self.add_client_id(request);

        let mut http = request.build(method, &self.shared.config.api_url());
        http.set_header("Authorization", authorization_header(token));
        http
    }

    pub fn get(&self, request: &Request) -> Result<HttpResponse> {
        self.execute(Method::Get, request)
    }

    pub fn head(&self, request: &Request) -> Result<HttpResponse> {
        self.execute(Method::Head, request)
    }

    pub fn post(&self, request: &Request) -> Result<HttpResponse> {
        self.execute(Method::Post, request)
    }

    pub fn put(&self, request: &Request) -> Result<HttpResponse> {
        self.execute(Method::Put, request)
    }

    pub fn delete(&self, request: &Request) -> Result<HttpResponse> {
        self.execute(Method::Delete, request)
    }

    /// Execute `request` and return the response whatever its status.
    ///
    /// A 401 on a request without a token override triggers one
    /// re-authentication attempt (listener replacement, then refresh grant)
    /// followed by a single retry.
    pub fn execute(&self, method: Method, request: &Request) -> Result<HttpResponse> {
        let current = self.token();
        let token = request.token().or(current.as_deref());
        let http = self.prepare(method, request, token);

        let response = self.send(&http)?;
        if response.status != 401 || request.token().is_some() || is_grant_request(request) {
            return Ok(response);
        }

        match self.reauthenticate(current.as_ref())? {
            Some(token) => {
                let mut retry = http;
                retry.set_header("Authorization", authorization_header(Some(&token)));
                self.send(&retry)
            }
            None => Ok(response),
        }
    }

    /// Send `request` as is: no default parameters, no client id and no
    /// Authorization header. Meant for third party hosts such as signed
    /// media URLs, where extra parameters would break the signature.
    pub fn fetch(&self, method: Method, request: &Request) -> Result<HttpResponse> {
        let http = request.build(method, &self.shared.config.api_url());
        self.send(&http)
    }

    /// Execute `request` and decode a successful JSON response
    pub fn apply<T>(&self, method: Method, request: &Request) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(method, request)?;
        if !response.is_success() {
            return Err(ApiError::ApiResponse {
                status: response.status,
                body: response.text(),
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn send(&self, http: &HttpRequest) -> Result<HttpResponse> {
        let start = Instant::now();
        let response = self.shared.retry.send(self.shared.transport.as_ref(), http)?;
        debug!(
            method = http.method.as_str(),
            url = %http.url,
            status = response.status,
            elapsed = ?start.elapsed(),
            "request completed"
        );
        Ok(response)
    }

    /// Find a usable token after `failed` was rejected.
    ///
    /// Without a replacement from the listener the rejected access
    /// credential is dropped before a refresh is attempted.
    fn reauthenticate(&self, failed: Option<&Arc<Token>>) -> Result<Option<Arc<Token>>> {
        let listener = self.listener();
        if let Some(replacement) = listener.on_token_invalid(failed.map(|t| &**t)) {
            info!("token rejected, using replacement from listener");
            return Ok(Some(self.install(replacement)));
        }

        if let Some(failed) = failed {
            self.discard(failed);
        }
        let failed = failed.map(|t| &**t);

        if failed.and_then(Token::refresh).is_none() {
            debug!("token rejected and no refresh token available");
            return Ok(None);
        }

        info!("token rejected, refreshing");
        match self.shared.authenticator.refresh_grant(failed) {
            Ok(token) => {
                let token = self.install(token);
                listener.on_token_refreshed(&token);
                Ok(Some(token))
            }
            Err(err @ (ApiError::InvalidToken { .. } | ApiError::ApiResponse { .. })) => {
                warn!(error = %err, "token refresh failed");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Requests to the grant endpoint never trigger re-authentication
fn is_grant_request(request: &Request) -> bool {
    let resource = request.resource();
    match Url::parse(resource) {
        Ok(url) => url.path() == TOKEN_PATH,
        Err(_) => resource.trim_start_matches('/') == TOKEN_PATH.trim_start_matches('/'),
    }
}
