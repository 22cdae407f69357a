//! Transport configuration
//!
//! Deserialized from the `[api]` table of the service config, or built in
//! code with `TransportConfig::new`.

use std::time::Duration;

use serde::Deserialize;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh endpoint path, relative to the auth base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL all request paths are joined onto.
    pub base_url: String,
    /// Base URL of the auth API. Defaults to `base_url`.
    #[serde(default)]
    pub auth_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as `X-Feature` on every request when set.
    #[serde(default)]
    pub feature: Option<String>,
    /// When false, a 401 is returned as-is and no refresh is attempted.
    #[serde(default = "default_enable_refresh")]
    pub enable_refresh: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_enable_refresh() -> bool {
    true
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_base_url: None,
            timeout_secs: default_timeout_secs(),
            feature: None,
            enable_refresh: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL of the auth API.
    pub fn auth_base(&self) -> &str {
        self.auth_base_url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/')
    }

    /// Absolute URL of the refresh endpoint.
    pub fn refresh_url(&self) -> String {
        format!("{}{REFRESH_PATH}", self.auth_base())
    }

    /// Join a request path onto the base URL. Absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Reject values the transport cannot work with.
    pub fn validate(&self) -> common::Result<()> {
        for (field, url) in [
            ("base_url", Some(self.base_url.as_str())),
            ("auth_base_url", self.auth_base_url.as_deref()),
        ] {
            if let Some(url) = url
                && !url.starts_with("http://")
                && !url.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
