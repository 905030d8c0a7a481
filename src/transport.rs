//! HTTP transport boundary
//!
//! The client never talks to `reqwest` directly: every call goes through the
//! [`Transport`] trait so the retry policy and the re-authentication logic can
//! be exercised against a scripted [`MockTransport`].

use crate::client::{create_http_client, Config};
use crate::error::{ApiError, Result};
use reqwest::blocking::{Body, Client};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Progress callback, invoked with the cumulative number of body bytes sent
pub type TransferProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Whether parameters of a body-less request travel in the body
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Fully rendered request, ready for the wire
#[derive(Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub progress: Option<TransferProgressFn>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            progress: None,
        }
    }

    /// Get the first header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace any header with the given name
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Path and query of the target URL, or the URL itself if it is relative
    pub fn path_and_query(&self) -> String {
        match Url::parse(&self.url) {
            Ok(parsed) => parsed[url::Position::BeforePath..].to_string(),
            Err(_) => self.url.clone(),
        }
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

/// Response as received from the transport, status and headers untouched
#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Response with a JSON body
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        HttpResponse::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    /// Redirect response pointing at `location`
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        HttpResponse::new(status).with_header("Location", location)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the first header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Classification of a transport failure, used to pick a retry action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Request timed out
    Timeout,
    /// Connection could not be established
    Connect,
    /// The client failed internally without producing a response
    Internal,
    /// The client rejected a well-formed request, typically a reused connection gone bad
    Malformed,
    /// Any other I/O failure
    Io,
}

/// Failure reported by a [`Transport`]
#[derive(Clone, Debug, Error)]
#[error("{class:?} transport failure: {message}")]
pub struct TransportError {
    pub class: FailureClass,
    pub message: String,
}

impl TransportError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        TransportError {
            class,
            message: message.into(),
        }
    }
}

/// Anything able to perform a blocking HTTP exchange
pub trait Transport: Send + Sync {
    /// Send a request and return the response, whatever its status
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// What to do when the transport fails with a given [`FailureClass`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAction {
    /// Hand the failure to the caller as an ordinary transport error
    Propagate,
    /// Treat the transport as broken, after retrying up to `retries` times
    Broken { retries: u32 },
}

/// Per failure class retry policy for transport calls
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    actions: HashMap<FailureClass, FailureAction>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new()
            .with_action(FailureClass::Internal, FailureAction::Broken { retries: 1 })
            .with_action(FailureClass::Malformed, FailureAction::Broken { retries: 0 })
    }
}

impl RetryPolicy {
    /// Policy propagating every failure unchanged
    pub fn new() -> Self {
        RetryPolicy {
            actions: HashMap::new(),
        }
    }

    pub fn with_action(mut self, class: FailureClass, action: FailureAction) -> Self {
        self.actions.insert(class, action);
        self
    }

    pub fn action(&self, class: FailureClass) -> FailureAction {
        self.actions
            .get(&class)
            .copied()
            .unwrap_or(FailureAction::Propagate)
    }

    /// Send `request`, applying the configured action on failure
    pub fn send(&self, transport: &dyn Transport, request: &HttpRequest) -> Result<HttpResponse> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match transport.send(request) {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            match self.action(err.class) {
                FailureAction::Propagate => return Err(ApiError::Transport(err)),
                FailureAction::Broken { retries } if attempts <= retries => {
                    warn!(
                        method = request.method.as_str(),
                        url = %request.url,
                        attempt = attempts,
                        error = %err,
                        "transport failure, retrying"
                    );
                }
                FailureAction::Broken { .. } => {
                    warn!(
                        method = request.method.as_str(),
                        url = %request.url,
                        attempts,
                        error = %err,
                        "transport broken"
                    );
                    return Err(ApiError::BrokenTransport {
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }
}

/// Transport backed by a blocking `reqwest` client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport using the HTTP settings from `config`
    pub fn new(config: &Config) -> Result<Self> {
        Ok(ReqwestTransport {
            client: create_http_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = match request.progress {
                Some(ref progress) => builder.body(Body::sized(
                    CountingReader::new(body.clone(), progress.clone()),
                    body.len() as u64,
                )),
                None => builder.body(body.clone()),
            };
        }

        let response = builder.send().map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().map_err(|e| classify(&e))?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    use std::error::Error as _;

    let class = if err.is_timeout() {
        FailureClass::Timeout
    } else if err.is_connect() {
        FailureClass::Connect
    } else if err.is_builder() {
        FailureClass::Malformed
    } else if err.is_request() && err.source().is_none() {
        FailureClass::Internal
    } else {
        FailureClass::Io
    };
    TransportError::new(class, err.to_string())
}

/// Reader reporting the cumulative number of bytes consumed
struct CountingReader {
    inner: Cursor<Vec<u8>>,
    sent: u64,
    progress: TransferProgressFn,
}

impl CountingReader {
    fn new(data: Vec<u8>, progress: TransferProgressFn) -> Self {
        CountingReader {
            inner: Cursor::new(data),
            sent: 0,
            progress,
        }
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sent += n as u64;
            (self.progress)(self.sent);
        }
        Ok(n)
    }
}

enum Scripted {
    Response(HttpResponse),
    Failure(TransportError),
}

impl Scripted {
    fn reply(&self) -> std::result::Result<HttpResponse, TransportError> {
        match self {
            Scripted::Response(r) => Ok(r.clone()),
            Scripted::Failure(e) => Err(e.clone()),
        }
    }
}

struct Rule {
    method: Option<Method>,
    path_and_query: String,
    reply: Scripted,
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<Scripted>,
    rules: Vec<Rule>,
    fallback: Option<Scripted>,
    history: Vec<HttpRequest>,
}

/// Scripted transport for tests.
///
/// Pending replies are consumed first (FIFO), then rules matching the
/// request's path and query, then the fallback reply.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a response for the next unanswered request
    pub fn push_response(&self, response: HttpResponse) -> &Self {
        self.state().pending.push_back(Scripted::Response(response));
        self
    }

    /// Queue a response with a plain body
    pub fn push_body(&self, status: u16, body: &str) -> &Self {
        self.push_response(HttpResponse::new(status).with_body(body))
    }

    /// Queue a failure for the next unanswered request
    pub fn push_failure(&self, error: TransportError) -> &Self {
        self.state().pending.push_back(Scripted::Failure(error));
        self
    }

    /// Answer every request to `path_and_query` with `response`
    pub fn on(&self, method: Option<Method>, path_and_query: &str, response: HttpResponse) -> &Self {
        self.state().rules.push(Rule {
            method,
            path_and_query: path_and_query.to_string(),
            reply: Scripted::Response(response),
        });
        self
    }

    /// Answer any otherwise unmatched request with `response`
    pub fn set_fallback(&self, response: HttpResponse) -> &Self {
        self.state().fallback = Some(Scripted::Response(response));
        self
    }

    /// Fail any otherwise unmatched request with `error`
    pub fn fail_always(&self, error: TransportError) -> &Self {
        self.state().fallback = Some(Scripted::Failure(error));
        self
    }

    /// All requests seen so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().history.clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.state().history.last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.state().history.len()
    }

    pub fn clear(&self) {
        *self.state() = MockState::default();
    }
}

impl Transport for MockTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut state = self.state();
        state.history.push(request.clone());

        if let Some(next) = state.pending.pop_front() {
            return next.reply();
        }

        let target = request.path_and_query();
        if let Some(rule) = state.rules.iter().find(|r| {
            // exact path and query, optionally restricted to one method
            r.path_and_query == target && r.method.map_or(true, |m| m == request.method)
        }) {
            return rule.reply.reply();
        }

        match state.fallback {
            Some(ref fallback) => fallback.reply(),
            None => Err(TransportError::new(
                FailureClass::Connect,
                format!("no mock response for {} {}", request.method.as_str(), request.url),
            )),
        }
    }
}
