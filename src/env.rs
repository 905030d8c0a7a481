use serde::{Deserialize, Serialize};

/// Target deployment: the API host serving resources and the web host
/// serving the connect (authorization) pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Env {
    pub api_host: String,
    pub web_host: String,
}

impl Env {
    /// Production environment
    pub fn live() -> Self {
        Env::new("api.soundcloud.com", "soundcloud.com")
    }

    /// Sandbox environment
    pub fn sandbox() -> Self {
        Env::new("api.sandbox-soundcloud.com", "sandbox-soundcloud.com")
    }

    pub fn new(api_host: impl Into<String>, web_host: impl Into<String>) -> Self {
        Env {
            api_host: api_host.into(),
            web_host: web_host.into(),
        }
    }

    /// Look up an environment by name (`live` or `sandbox`)
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "live" => Some(Env::live()),
            "sandbox" => Some(Env::sandbox()),
            _ => None,
        }
    }

    /// Base URL for the API host or the web host
    pub fn base_url(&self, api_host: bool, ssl: bool) -> String {
        let scheme = if ssl { "https" } else { "http" };
        let host = if api_host { &self.api_host } else { &self.web_host };
        format!("{}://{}", scheme, host)
    }

    /// Check if `host` (optionally with a port) is this environment's API host
    pub fn is_api_host(&self, host: &str) -> bool {
        let name = host.rsplit_once(':').map_or(host, |(name, _)| name);
        name.eq_ignore_ascii_case(&self.api_host)
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::live()
    }
}
