//! Description of a logical API call.
//!
//! A [`Request`] is a plain value: builder methods consume and return it, and
//! cloning yields an independent copy. Only the progress listener is shared
//! between copies.

use crate::error::{ApiError, Result};
use crate::token::Token;
use crate::transport::{HttpRequest, Method, TransferProgressFn};
use std::fmt;
use std::path::Path;
use url::{form_urlencoded, Url};
use uuid::Uuid;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const OCTET_STREAM: &str = "application/octet-stream";

/// One part of a multipart body
#[derive(Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub data: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: String,
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.name)
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Request payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    /// Raw content with an explicit content type
    Content { data: Vec<u8>, content_type: String },
    /// multipart/form-data upload
    Multipart(Vec<Part>),
}

/// Byte range of a partial content request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to `end` inclusive, or to the end of the resource
    pub fn new(start: u64, end: Option<u64>) -> Result<Self> {
        if let Some(end) = end {
            if end < start {
                return Err(ApiError::InvalidArgument(format!(
                    "invalid range: end {} before start {}",
                    end, start
                )));
            }
        }
        Ok(ByteRange { start, end })
    }

    /// Open ended range starting at `start`
    pub fn from(start: u64) -> Self {
        ByteRange { start, end: None }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{}", self.start, end),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

/// Format a Range header value
pub fn format_range(start: u64, end: Option<u64>) -> Result<String> {
    Ok(ByteRange::new(start, end)?.to_string())
}

/// A logical API call: resource, parameters, payload and per-request options
#[derive(Clone, Default)]
pub struct Request {
    resource: String,
    params: Vec<(String, String)>,
    body: Option<Body>,
    if_none_match: Option<String>,
    range: Option<ByteRange>,
    token: Option<Token>,
    listener: Option<TransferProgressFn>,
}

impl Request {
    /// Request for an empty resource
    pub fn new() -> Self {
        Self::default()
    }

    /// Request for `resource` (a path or an absolute URL).
    ///
    /// A query string already present in `resource` is parsed into parameters.
    pub fn to(resource: impl AsRef<str>) -> Self {
        let resource = resource.as_ref();
        match resource.split_once('?') {
            Some((path, query)) => Request {
                resource: path.to_string(),
                params: form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect(),
                ..Default::default()
            },
            None => Request {
                resource: resource.to_string(),
                ..Default::default()
            },
        }
    }

    /// Request for the path and query of `url`; scheme and host are dropped
    pub fn from_url(url: &Url) -> Self {
        Request {
            resource: url.path().to_string(),
            params: url.query_pairs().into_owned().collect(),
            ..Default::default()
        }
    }

    /// Append a parameter; duplicate names are kept in insertion order
    pub fn with(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Append several parameters
    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: fmt::Display,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.to_string())));
        self
    }

    /// Raw content body with its content type
    pub fn with_content(mut self, content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        self.body = Some(Body::Content {
            data: content.into(),
            content_type: content_type.into(),
        });
        self
    }

    /// Raw body sent as `application/octet-stream`
    pub fn with_entity(self, data: impl Into<Vec<u8>>) -> Self {
        self.with_content(data, OCTET_STREAM)
    }

    /// Add a file part, named after the file
    pub fn with_file(self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned());
        let data = std::fs::read(path)?;
        Ok(self.with_part(name.into(), data, filename))
    }

    /// Add a file part under an explicit filename
    pub fn with_file_named(
        self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        filename: impl Into<String>,
    ) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(self.with_part(name.into(), data, Some(filename.into())))
    }

    /// Add an in-memory file part
    pub fn with_file_bytes(
        self,
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        filename: Option<&str>,
    ) -> Self {
        self.with_part(name.into(), data.into(), filename.map(str::to_string))
    }

    fn with_part(mut self, name: String, data: Vec<u8>, filename: Option<String>) -> Self {
        let part = Part {
            name,
            data,
            filename,
            content_type: OCTET_STREAM.to_string(),
        };
        match self.body {
            Some(Body::Multipart(ref mut parts)) => parts.push(part),
            _ => self.body = Some(Body::Multipart(vec![part])),
        }
        self
    }

    /// Send `If-None-Match` with the given entity tag
    pub fn if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    /// Request a byte range of the resource
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Use `token` for this request instead of the client's current token
    pub fn using_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Report upload progress to `listener`; the listener is shared by clones
    pub fn with_progress_listener(mut self, listener: TransferProgressFn) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Parameters in insertion order
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First value of the parameter `name`
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Number of parameters
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.range
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn listener(&self) -> Option<&TransferProgressFn> {
        self.listener.as_ref()
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, Some(Body::Multipart(_)))
    }

    /// Parameters encoded as `application/x-www-form-urlencoded`
    pub fn query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }

    /// Resource with the parameters appended as a query string
    pub fn to_url(&self) -> String {
        if self.params.is_empty() {
            self.resource.clone()
        } else {
            format!("{}?{}", self.resource, self.query_string())
        }
    }

    /// Absolute URL: relative resources are resolved against `base`
    pub fn to_url_with_base(&self, base: &str) -> String {
        if is_absolute(&self.resource) {
            self.to_url()
        } else {
            join_base(base, &self.to_url())
        }
    }

    /// Render the wire-level request.
    ///
    /// Parameters travel in the query string, except for a multipart body
    /// (where they become form fields) and for a POST/PUT without payload
    /// (where they form a urlencoded body).
    pub fn build(&self, method: Method, base: &str) -> HttpRequest {
        let mut url_params = true;
        let mut http = HttpRequest::new(method, String::new());

        match self.body {
            Some(Body::Content {
                ref data,
                ref content_type,
            }) => {
                http.set_header("Content-Type", content_type.clone());
                http.body = Some(data.clone());
            }
            Some(Body::Multipart(ref parts)) => {
                let boundary = format!("----cloudapi-{}", Uuid::new_v4().simple());
                http.set_header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", boundary),
                );
                http.body = Some(encode_multipart(&boundary, &self.params, parts));
                url_params = false;
            }
            None if method.has_body() && !self.params.is_empty() => {
                http.set_header("Content-Type", FORM_CONTENT_TYPE);
                http.body = Some(self.query_string().into_bytes());
                url_params = false;
            }
            None => {}
        }

        http.url = if url_params {
            self.to_url_with_base(base)
        } else if is_absolute(&self.resource) {
            self.resource.clone()
        } else {
            join_base(base, &self.resource)
        };

        if let Some(ref etag) = self.if_none_match {
            http.set_header("If-None-Match", etag.clone());
        }
        if let Some(range) = self.range {
            http.set_header("Range", range.to_string());
        }
        if http.body.is_some() {
            http.progress = self.listener.clone();
        }
        http
    }
}

fn is_absolute(resource: &str) -> bool {
    resource.starts_with("http://") || resource.starts_with("https://")
}

/// Append a relative resource to `base`, keeping it on the base host
fn join_base(base: &str, resource: &str) -> String {
    let base = base.trim_end_matches('/');
    if resource.is_empty() || resource.starts_with(['/', '?']) {
        format!("{}{}", base, resource)
    } else {
        format!("{}/{}", base, resource)
    }
}

fn encode_multipart(boundary: &str, params: &[(String, String)], parts: &[Part]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in params {
        out.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary,
                escape_disposition(name),
                value
            )
            .as_bytes(),
        );
    }
    for part in parts {
        let filename = part.filename.as_deref().unwrap_or(&part.name);
        out.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                boundary,
                escape_disposition(&part.name),
                escape_disposition(filename),
                part.content_type
            )
            .as_bytes(),
        );
        out.extend_from_slice(&part.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    out
}

/// Percent-encode the characters that would end a quoted Content-Disposition value
fn escape_disposition(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("resource", &self.resource)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("if_none_match", &self.if_none_match)
            .field("range", &self.range)
            .field("token", &self.token)
            .field("listener", &self.listener.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
