use crate::error::{ApiError, Result};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Wildcard scope, satisfying every scope requirement except
/// [`SCOPE_NON_EXPIRING`].
///
/// A token scoped `*` without a refresh credential is therefore not
/// [`Token::valid`]: non-expiry has to be granted explicitly.
pub const SCOPE_DEFAULT: &str = "*";
/// Scope issued to app-level tokens that may only create accounts.
pub const SCOPE_SIGNUP: &str = "signup";
/// Scope marking an access credential that never expires.
pub const SCOPE_NON_EXPIRING: &str = "non-expiring";

const SIGNUP_PARAMETER_SUFFIX: &str = ":user:sign-up";

/// Token represents an OAuth2 token as issued by the grant endpoint.
///
/// A token is never partially updated: a refresh produces a new `Token`
/// which replaces the previous one. The only in-place change is
/// [`Token::invalidate`], which drops the access credential.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "access_token")]
    access: Option<String>,

    #[serde(rename = "refresh_token")]
    refresh: Option<String>,

    scope: Option<String>,

    /// Absolute expiry, derived from `expires_in` when the token was issued
    expires_at: Option<DateTime<Utc>>,

    /// Provider specific fields, in the order they were received
    #[serde(default)]
    custom_parameters: IndexMap<String, String>,
}

impl Token {
    /// Create a Token with both access and refresh credentials
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Token {
            access: Some(access.into()),
            refresh: Some(refresh.into()),
            ..Default::default()
        }
    }

    /// Parse a grant response body
    ///
    /// `access_token` is mandatory. `expires_in` is converted to an absolute
    /// expiry relative to now. Any key not part of the standard set is kept
    /// as a custom parameter, with scalars stored by their textual form.
    pub fn from_json(json: &Value) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| ApiError::ApiResponse {
            status: 200,
            body: json.to_string(),
        })?;

        let mut token = Token::default();
        for (key, value) in obj {
            match key.as_str() {
                "access_token" => token.access = value.as_str().map(str::to_string),
                "refresh_token" => token.refresh = value.as_str().map(str::to_string),
                "scope" => token.scope = value.as_str().map(str::to_string),
                "expires_in" => {
                    token.expires_at = value
                        .as_i64()
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                        .and_then(Duration::try_seconds)
                        .and_then(|ttl| Utc::now().checked_add_signed(ttl));
                }
                _ => {
                    let text = match value {
                        Value::Null => continue,
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    token.custom_parameters.insert(key.clone(), text);
                }
            }
        }

        if token.access.is_none() {
            return Err(ApiError::ApiResponse {
                status: 200,
                body: json.to_string(),
            });
        }
        Ok(token)
    }

    pub fn with_access(mut self, access: impl Into<String>) -> Self {
        self.access = Some(access.into());
        self
    }

    pub fn with_refresh(mut self, refresh: impl Into<String>) -> Self {
        self.refresh = Some(refresh.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_custom_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }

    /// Access credential sent in the Authorization header
    pub fn access(&self) -> Option<&str> {
        self.access.as_deref()
    }

    /// Refresh credential used to obtain a new token
    pub fn refresh(&self) -> Option<&str> {
        self.refresh.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn custom_parameters(&self) -> &IndexMap<String, String> {
        &self.custom_parameters
    }

    /// Sign-up marker returned alongside app tokens, if any
    pub fn signup(&self) -> Option<&str> {
        self.custom_parameters
            .iter()
            .find(|(key, _)| key.ends_with(SIGNUP_PARAMETER_SUFFIX))
            .map(|(_, value)| value.as_str())
    }

    /// Check if the expiry has passed. Tokens without expiry never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| at <= Utc::now())
    }

    /// Drop the access credential, keeping the refresh credential.
    pub fn invalidate(&mut self) {
        self.access = None;
    }

    /// Copy of this token with the access credential dropped
    pub fn invalidated(&self) -> Self {
        let mut token = self.clone();
        token.invalidate();
        token
    }

    /// A token is usable when it has an access credential and can either be
    /// refreshed or never expires.
    pub fn valid(&self) -> bool {
        self.access.is_some() && (self.refresh.is_some() || self.non_expiring_scoped())
    }

    /// Check whether every scope in the whitespace separated `scope` is granted.
    ///
    /// The default scope covers everything except [`SCOPE_NON_EXPIRING`],
    /// which has to be granted explicitly.
    pub fn scoped(&self, scope: &str) -> bool {
        let granted = scope_set(self.scope.as_deref());
        let mut required = scope.split_whitespace().peekable();
        if required.peek().is_none() {
            return false;
        }
        required.all(|s| {
            granted.contains(s) || (s != SCOPE_NON_EXPIRING && granted.contains(SCOPE_DEFAULT))
        })
    }

    pub fn default_scoped(&self) -> bool {
        self.scoped(SCOPE_DEFAULT)
    }

    pub fn signup_scoped(&self) -> bool {
        scope_set(self.scope.as_deref()).contains(SCOPE_SIGNUP)
    }

    pub fn non_expiring_scoped(&self) -> bool {
        self.scoped(SCOPE_NON_EXPIRING)
    }
}

/// Split a scope string into its set of capability identifiers
pub(crate) fn scope_set(scope: Option<&str>) -> HashSet<&str> {
    scope.map(|s| s.split_whitespace().collect()).unwrap_or_default()
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.access == other.access && self.refresh == other.refresh && self.scope == other.scope
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Token")
            .field("access", &redact(&self.access))
            .field("refresh", &redact(&self.refresh))
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
