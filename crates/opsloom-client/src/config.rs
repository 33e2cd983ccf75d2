//! Client configuration types.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Default service root, matching a locally running backend.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/opsloom-api/v1";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Service root; endpoint paths are appended to it.
    #[serde(default = "ClientConfig::default_base_url")]
    pub base_url: String,

    /// Timeout for JSON calls in seconds. Not applied to the response stream.
    #[serde(default = "ClientConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Connection establishment timeout in seconds.
    #[serde(default = "ClientConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Ambient credentials attached to every request.
    #[serde(default)]
    pub credentials: Credentials,
}

impl ClientConfig {
    fn default_base_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    const fn default_connect_timeout() -> u64 {
        5
    }

    /// Config for the given service root with default timeouts.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Replace the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Get the JSON request timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// The base URL without a trailing slash.
    #[must_use]
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            request_timeout_seconds: Self::default_request_timeout(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            credentials: Credentials::None,
        }
    }
}

/// Ambient credentials for the service.
///
/// The browser client relied on its cookie jar; outside a browser the session
/// cookie or a bearer token has to be supplied explicitly.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Credentials {
    /// No credentials.
    #[default]
    None,
    /// A raw `Cookie` header value, e.g. `session=abc123`.
    Cookie(String),
    /// A bearer token for the `Authorization` header.
    Bearer(String),
}

impl Credentials {
    /// Headers carrying these credentials.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the value is not a valid header value.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match self {
            Self::None => {}
            Self::Cookie(cookie) => {
                headers.insert(COOKIE, header_value(cookie)?);
            }
            Self::Bearer(token) => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
            }
        }
        Ok(headers)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Cookie(_) => f.write_str("Cookie(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(raw)
        .map_err(|e| ClientError::Config(format!("invalid credential header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}
