//! Verifier configuration
//!
//! [`AppCheckConfig`] carries the project id audiences are checked against,
//! the JWKS endpoint, and the cache and timing knobs of the key source.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppCheckError, Result};
use crate::{DEFAULT_CLOCK_SKEW_LEEWAY, JWKS_URL};

/// How the `typ` JOSE header is treated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypePolicy {
    /// `typ` must be present and equal `JWT`
    #[default]
    Required,
    /// `typ` may be absent; when present it must equal `JWT`
    AllowMissing,
}

/// App Check verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCheckConfig {
    /// Project id; tokens must list `projects/{project_id}` in `aud`
    pub project_id: String,

    /// JWKS endpoint serving the App Check signing keys
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,

    /// How long a fetched key set is used before a refresh is attempted.
    /// A `Cache-Control: max-age` on the JWKS response takes precedence.
    #[serde(default = "default_cache_ttl", with = "duration_secs")]
    pub cache_ttl: Duration,

    /// Upper bound applied to `max-age` from the JWKS response
    #[serde(default = "default_max_cache_ttl", with = "duration_secs")]
    pub max_cache_ttl: Duration,

    /// Minimum time between two refreshes triggered by unknown key ids
    #[serde(default = "default_min_refresh_interval", with = "duration_secs")]
    pub min_refresh_interval: Duration,

    /// Timeout for a single JWKS request
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,

    /// Tolerance applied to `exp`, `iat` and `nbf`
    #[serde(default = "default_clock_skew_leeway", with = "duration_secs")]
    pub clock_skew_leeway: Duration,

    /// Whether the `typ` header may be omitted
    #[serde(default)]
    pub token_type_policy: TokenTypePolicy,

    /// Tokens longer than this many bytes are rejected as malformed
    #[serde(default = "default_max_token_length")]
    pub max_token_length: usize,
}

fn default_jwks_url() -> String {
    JWKS_URL.to_string()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_max_cache_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_clock_skew_leeway() -> Duration {
    DEFAULT_CLOCK_SKEW_LEEWAY
}

fn default_max_token_length() -> usize {
    8 * 1024
}

impl AppCheckConfig {
    /// Create a configuration for `project_id` with default settings
    ///
    /// # Example
    ///
    /// ```rust
    /// use appcheck::AppCheckConfig;
    ///
    /// let config = AppCheckConfig::new("my-project");
    /// assert_eq!(config.jwks_url, appcheck::JWKS_URL);
    /// ```
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: default_jwks_url(),
            cache_ttl: default_cache_ttl(),
            max_cache_ttl: default_max_cache_ttl(),
            min_refresh_interval: default_min_refresh_interval(),
            request_timeout: default_request_timeout(),
            clock_skew_leeway: default_clock_skew_leeway(),
            token_type_policy: TokenTypePolicy::default(),
            max_token_length: default_max_token_length(),
        }
    }

    /// Override the JWKS endpoint (tests, emulators)
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    /// Set the default key cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the minimum interval between refresh-on-miss attempts
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the JWKS request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the clock skew leeway for time-based claims
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// Set the `typ` header policy
    pub fn with_token_type_policy(mut self, policy: TokenTypePolicy) -> Self {
        self.token_type_policy = policy;
        self
    }

    /// The audience value a token must carry for this project
    pub fn expected_audience(&self) -> String {
        format!("projects/{}", self.project_id)
    }

    /// Check the settings that do not need network access
    ///
    /// # Errors
    ///
    /// Returns [`AppCheckError::InvalidConfiguration`] if the project id is
    /// empty or the token length limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(AppCheckError::InvalidConfiguration(
                "project id must not be empty".to_string(),
            ));
        }
        if self.max_token_length == 0 {
            return Err(AppCheckError::InvalidConfiguration(
                "max token length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
