//! Runtime configuration.
//!
//! Plain serde structs with defaults; no ambient global state. The
//! publishable key encodes both the instance kind (`pk_test_` /
//! `pk_live_` prefix) and, in its base64 tail, the frontend API domain
//! used when no explicit base URL is configured.

use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub use crate::retry::RetryConfig;

/// Kind of identity-service instance a publishable key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceKind {
    /// Development instance (`pk_test_` keys).
    Development,
    /// Production instance (`pk_live_` keys).
    Production,
}

impl InstanceKind {
    /// Stable lowercase tag used in telemetry payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceKind::Development => "development",
            InstanceKind::Production => "production",
        }
    }
}

/// Configuration for the session refresh polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Steady-state poll interval in milliseconds.
    pub base_interval_ms: u64,
    /// Upper bound for the exponential backoff interval in milliseconds.
    pub max_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 5_000,
            max_interval_ms: 60_000,
        }
    }
}

/// Configuration for the telemetry pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Master switch; when false every event is rejected at record time.
    pub enabled: bool,
    /// Collector endpoint events are POSTed to.
    pub endpoint: String,
    /// Buffer capacity that triggers an eager flush.
    pub max_buffer_size: usize,
    /// Periodic flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Global uniform sampling rate in [0, 1].
    pub sampling_rate: f64,
    /// Debug flag that bypasses sampling and throttling.
    pub disable_throttling: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://telemetry.postern.dev/v1/events".into(),
            max_buffer_size: 5,
            flush_interval_ms: 30_000,
            sampling_rate: 0.1,
            disable_throttling: false,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Publishable key identifying the target instance.
    pub publishable_key: String,
    /// Explicit base URL override; decoded from the key when absent.
    pub base_url: Option<String>,
    /// BCP 47 locale injected into every request.
    pub locale: Option<String>,
    /// Path prefix applied when requests are routed through a proxy.
    pub proxy_path: Option<String>,
    /// Polling loop settings.
    pub polling: PollingConfig,
    /// Default retry settings for the pipeline.
    pub retry: RetryConfig,
    /// Telemetry settings.
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    /// Create a configuration for the given publishable key with defaults
    /// everywhere else.
    pub fn new(publishable_key: impl Into<String>) -> Self {
        Self {
            publishable_key: publishable_key.into(),
            base_url: None,
            locale: None,
            proxy_path: None,
            polling: PollingConfig::default(),
            retry: RetryConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    /// Instance kind derived from the publishable key prefix.
    pub fn instance_kind(&self) -> Result<InstanceKind> {
        if self.publishable_key.starts_with("pk_test_") {
            Ok(InstanceKind::Development)
        } else if self.publishable_key.starts_with("pk_live_") {
            Ok(InstanceKind::Production)
        } else {
            Err(Error::config(format!(
                "unrecognized publishable key prefix: {}",
                self.publishable_key
                    .get(..8)
                    .unwrap_or(&self.publishable_key)
            )))
        }
    }

    /// Base URL for API requests.
    ///
    /// Prefers the explicit override; otherwise decodes the frontend API
    /// domain from the publishable key's base64 tail (which carries a `$`
    /// terminator).
    pub fn resolved_base_url(&self) -> Result<String> {
        if let Some(url) = &self.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let tail = self
            .publishable_key
            .strip_prefix("pk_test_")
            .or_else(|| self.publishable_key.strip_prefix("pk_live_"))
            .ok_or_else(|| Error::config("publishable key has no recognized prefix"))?;
        let decoded = STANDARD_NO_PAD
            .decode(tail.trim_end_matches('='))
            .map_err(|err| Error::config(format!("publishable key is not base64: {err}")))?;
        let domain = String::from_utf8(decoded)
            .map_err(|_| Error::config("publishable key domain is not UTF-8"))?;
        let domain = domain.trim_end_matches('$');
        if domain.is_empty() {
            return Err(Error::config("publishable key decodes to an empty domain"));
        }
        Ok(format!("https://{domain}"))
    }
}
