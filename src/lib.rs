//! # cloudapi - OAuth2 authenticated API client
//!
//! A blocking client for an OAuth2 protected resource API. It keeps track of
//! the current bearer token, transparently re-authenticates requests that
//! fail with 401, shields callers from a misbehaving HTTP transport and
//! resolves permalinks and streams to concrete locations.
//!
//! ## Features
//!
//! - OAuth2 grants: password, client credentials, authorization code,
//!   refresh token and provider specific extension grants
//! - Scope verification of granted tokens
//! - One transparent retry after re-authentication on 401
//! - Per failure class retry policy for the transport
//! - Permalink and stream resolution
//! - A single client shared between threads
//!
//! ## Basic Usage
//!
//! ```no_run
//! use cloudapi::{ApiClient, Config, Request};
//!
//! fn main() -> Result<(), cloudapi::ApiError> {
//!     let api = ApiClient::new(Config::new("client_id", "client_secret"))?;
//!     api.login("user", "password", &[])?;
//!
//!     let response = api.get(&Request::to("/me"))?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Token listener
//!
//! ```no_run
//! use cloudapi::{ApiClient, Config, Token, TokenListener};
//! use std::sync::Arc;
//!
//! struct Store;
//!
//! impl TokenListener for Store {
//!     fn on_token_invalid(&self, _token: Option<&Token>) -> Option<Token> {
//!         None
//!     }
//!
//!     fn on_token_refreshed(&self, token: &Token) {
//!         // persist the new token
//!         let _ = serde_json::to_string(token);
//!     }
//! }
//!
//! let api = ApiClient::new(Config::new("client_id", "client_secret"))?
//!     .with_token(Token::new("access", "refresh"));
//! api.set_token_listener(Arc::new(Store));
//! # Ok::<(), cloudapi::ApiError>(())
//! ```
//!
//! ## Streams
//!
//! ```no_run
//! use cloudapi::{ApiClient, ByteRange, Config, Method};
//!
//! let api = ApiClient::new(Config::new("client_id", "client_secret"))?;
//! let stream = api.resolve_stream_url("https://api.soundcloud.com/tracks/1/stream", true)?;
//! let request = stream.stream_request().with_range(ByteRange::new(0, Some(99))?);
//! let partial = api.fetch(Method::Get, &request)?;
//! assert_eq!(partial.status, 206);
//! # Ok::<(), cloudapi::ApiError>(())
//! ```

pub mod auth;
pub mod client;
pub mod env;
pub mod error;
pub mod listener;
pub mod request;
pub mod resolve;
pub mod rest;
pub mod stream;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use auth::{Endpoint, Grant, TokenAuthenticator};
pub use client::Config;
pub use env::Env;
pub use error::{ApiError, Result};
pub use listener::{NoopListener, TokenListener};
pub use request::{format_range, Body, ByteRange, Part, Request};
pub use rest::ApiClient;
pub use stream::Stream;
pub use token::{Token, SCOPE_DEFAULT, SCOPE_NON_EXPIRING, SCOPE_SIGNUP};
pub use transport::{
    FailureAction, FailureClass, HttpRequest, HttpResponse, Method, MockTransport, ReqwestTransport,
    RetryPolicy, Transport, TransportError,
};
