//! Permalink and stream resolution.

use crate::error::{ApiError, Result};
use crate::request::Request;
use crate::rest::ApiClient;
use crate::stream::Stream;
use crate::transport::{HttpResponse, Method};
use tracing::{debug, warn};

/// Path of the resolution endpoint on the API host
pub const RESOLVE_PATH: &str = "/resolve";
/// Parameter suppressing the playback count on stream resolution
pub const SKIP_LOGGING: &str = "skip_logging";

impl ApiClient {
    /// Resolve a public permalink to the numeric id of the resource
    pub fn resolve(&self, permalink: &str) -> Result<u64> {
        let response = self.get(&Request::to(RESOLVE_PATH).with("url", permalink))?;

        let id = redirect_location(&response).and_then(trailing_id);
        match id {
            Some(id) => {
                debug!(permalink, id, "resolved permalink");
                Ok(id)
            }
            None => {
                warn!(permalink, status = response.status, "could not resolve permalink");
                Err(ApiError::resolver(
                    response.status,
                    format!("could not resolve {}", permalink),
                ))
            }
        }
    }

    /// Resolve a stream reference to its signed media URL and metadata.
    ///
    /// Metadata comes from the redirect response. If it carries none, the
    /// signed URL itself is queried with a HEAD request, without credentials.
    pub fn resolve_stream_url(&self, stream: &str, skip_logging: bool) -> Result<Stream> {
        let mut request = Request::to(stream);
        if skip_logging {
            request = request.with(SKIP_LOGGING, "1");
        }

        let response = self.head(&request)?;
        let location = match redirect_location(&response) {
            Some(location) => location.to_string(),
            None => {
                warn!(stream, status = response.status, "could not resolve stream");
                return Err(ApiError::resolver(
                    response.status,
                    format!("could not resolve stream {}", stream),
                ));
            }
        };

        if has_metadata(&response) {
            return Ok(Stream::new(stream, location, &response));
        }

        let media = self.fetch(Method::Head, &Request::to(&location))?;
        if !media.is_success() {
            warn!(stream, status = media.status, "signed stream URL rejected");
            return Err(ApiError::resolver(
                media.status,
                format!("could not fetch stream metadata for {}", stream),
            ));
        }
        Ok(Stream::new(stream, location, &media))
    }
}

fn redirect_location(response: &HttpResponse) -> Option<&str> {
    if response.is_redirect() {
        response.header("Location").filter(|l| !l.is_empty())
    } else {
        None
    }
}

fn has_metadata(response: &HttpResponse) -> bool {
    response.header("ETag").is_some() || response.header("Content-Length").is_some()
}

/// Numeric id in the last path segment of `location`
fn trailing_id(location: &str) -> Option<u64> {
    let path = location.split(['?', '#']).next()?;
    path.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
