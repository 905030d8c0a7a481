use crate::env::Env;
use crate::error::{ApiError, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::redirect::Policy;
use reqwest::Proxy;
use std::time::Duration;

/// Create the HTTP client used by the default transport.
///
/// Redirects are never followed: resolution relies on seeing the 3xx
/// response and its Location header.
pub fn create_http_client(config: &Config) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .redirect(Policy::none())
        .user_agent(config.user_agent.clone());

    if let Some(ref proxy) = config.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    Ok(builder.build()?)
}

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct Config {
    /// Client identity sent with every request
    pub client_id: String,
    /// Client secret sent with grant requests
    pub client_secret: String,
    /// Redirect URI registered for the authorization code flow
    pub redirect_uri: Option<String>,
    /// Target environment
    pub env: Env,
    /// Use https for API requests
    pub ssl: bool,
    /// Overall request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Optional proxy URL
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Config {
    /// Create a new configuration for the live environment
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Config {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
            env: Env::live(),
            ssl: true,
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            proxy: None,
            user_agent: concat!("cloudapi-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Read the configuration from `CLOUDAPI_CLIENT_ID`, `CLOUDAPI_CLIENT_SECRET`,
    /// and the optional `CLOUDAPI_REDIRECT_URI` and `CLOUDAPI_ENV` variables.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let client_id = var("CLOUDAPI_CLIENT_ID")
            .ok_or_else(|| ApiError::InvalidArgument("CLOUDAPI_CLIENT_ID is not set".to_string()))?;
        let client_secret = var("CLOUDAPI_CLIENT_SECRET").ok_or_else(|| {
            ApiError::InvalidArgument("CLOUDAPI_CLIENT_SECRET is not set".to_string())
        })?;

        let mut config = Config::new(client_id, client_secret);
        config.redirect_uri = var("CLOUDAPI_REDIRECT_URI");
        if let Some(name) = var("CLOUDAPI_ENV") {
            config.env = Env::by_name(&name)
                .ok_or_else(|| ApiError::InvalidArgument(format!("unknown environment: {}", name)))?;
        }
        Ok(config)
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Base URL for resource requests
    pub fn api_url(&self) -> String {
        self.env.base_url(true, self.ssl)
    }

    /// Base URL for the web (connect) pages
    pub fn web_url(&self) -> String {
        self.env.base_url(false, self.ssl)
    }
}
