// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push endpoint parsing and delivery settings.

use crate::errors::ConfigError;
use base64::Engine;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::error;

/// The only path a push endpoint may have.
pub const PUSH_PATH: &str = "/loki/api/v1/push";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

const ENV_PUSH_URL: &str = "LOKI_PUSH_URL";
const ENV_REQUEST_TIMEOUT_SECS: &str = "LOKI_REQUEST_TIMEOUT_SECS";
const ENV_MAX_IN_FLIGHT: &str = "LOKI_MAX_IN_FLIGHT";

/// Setting values that mean "shipping off".
const DISABLED_SENTINELS: &[&str] = &["false", "off", "disabled"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Destination of every push. Built once, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    credential: Option<String>,
}

impl EndpointConfig {
    /// Parses `scheme://[user:pass@]host[:port]/loki/api/v1/push`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::Empty);
        }

        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ConfigError::MissingHost),
        };

        let mut actual_path = url.path().to_string();
        if let Some(query) = url.query() {
            actual_path = format!("{actual_path}?{query}");
        }
        if let Some(fragment) = url.fragment() {
            actual_path = format!("{actual_path}#{fragment}");
        }
        if actual_path != PUSH_PATH && actual_path.strip_suffix('/') != Some(PUSH_PATH) {
            return Err(ConfigError::InvalidPath {
                expected: PUSH_PATH,
                actual: actual_path,
            });
        }

        let username = percent_decode_str(url.username())
            .decode_utf8_lossy()
            .to_string();
        let password = url
            .password()
            .map(|password| percent_decode_str(password).decode_utf8_lossy().to_string());
        let credential = match password {
            Some(password) => Some(format!("{username}:{password}")),
            None if !username.is_empty() => Some(username),
            None => None,
        };

        Ok(EndpointConfig {
            scheme,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            host,
            path: PUSH_PATH.to_string(),
            credential,
        })
    }

    /// Push URL without credentials.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// `Basic <base64(credential)>`, when a credential is configured.
    pub fn authorization(&self) -> Option<String> {
        self.credential.as_ref().map(|credential| {
            format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(credential)
            )
        })
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Parses the raw endpoint setting. Unset, blank and the disabled sentinels
/// yield `None` quietly; a malformed value is logged once and also yields
/// `None`, which disables shipping for the process lifetime.
pub fn parse_endpoint_setting(setting: Option<&str>) -> Option<EndpointConfig> {
    let setting = setting.map(str::trim).filter(|value| !value.is_empty())?;
    if DISABLED_SENTINELS
        .iter()
        .any(|sentinel| setting.eq_ignore_ascii_case(sentinel))
    {
        return None;
    }

    match EndpointConfig::parse(setting) {
        Ok(endpoint) => Some(endpoint),
        Err(e) => {
            error!("LOKI | Invalid push endpoint, log shipping disabled: {e}");
            None
        }
    }
}

/// Everything the transport needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `None` means shipping is disabled.
    pub endpoint: Option<EndpointConfig>,
    /// Upper bound for one push request, connect included.
    pub request_timeout: Duration,
    /// Pushes allowed to run at once; chunks beyond that are dropped.
    pub max_in_flight: usize,
    pub https_proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            https_proxy: None,
        }
    }
}

impl TransportConfig {
    pub fn with_endpoint(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let endpoint = parse_endpoint_setting(env::var(ENV_PUSH_URL).ok().as_deref());
        let request_timeout = env::var(ENV_REQUEST_TIMEOUT_SECS)
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let max_in_flight = env::var(ENV_MAX_IN_FLIGHT)
            .ok()
            .and_then(|max| max.parse::<usize>().ok())
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        let https_proxy = env::var("HTTPS_PROXY").ok();

        Self {
            endpoint,
            request_timeout,
            max_in_flight,
            https_proxy,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}
