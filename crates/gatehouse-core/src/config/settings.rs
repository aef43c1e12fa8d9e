//! Token, rate-limit and circuit-breaker settings loaded from TOML.
//!
//! Every field has a default so a server runs without any of these sections.
//! Secrets default to empty and must be filled in by the embedding server
//! before [`GuardConfig::validate`] passes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Longest accepted token lifetime: one year.
pub const MAX_TTL_MINUTES: u64 = 60 * 24 * 365;

/// Longest accepted breaker window or open timeout: one year.
pub const MAX_BREAKER_PERIOD_SECS: u64 = 60 * 60 * 24 * 365;

/// All settings owned by `gatehouse-core`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl GuardConfig {
    /// Parses a TOML document containing the `[tokens]`, `[rate_limit]` and
    /// `[breaker]` sections. Missing sections fall back to defaults.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Checks every section for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tokens.validate()?;
        self.rate_limit.validate()?;
        self.breaker.validate()
    }
}

/// Signing secrets and lifetimes for access and refresh tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub access_secret: String,
    #[serde(default)]
    pub refresh_secret: String,
    #[serde(default = "default_access_ttl_minutes")]
    pub access_ttl_minutes: u64,
    #[serde(default = "default_refresh_ttl_minutes")]
    pub refresh_ttl_minutes: u64,
}

impl TokenConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_minutes.saturating_mul(60))
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_minutes.saturating_mul(60))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "tokens.access_secret and tokens.refresh_secret must be set".to_string(),
            ));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::Invalid(
                "tokens.access_secret and tokens.refresh_secret must differ".to_string(),
            ));
        }
        if self.access_ttl_minutes == 0 || self.refresh_ttl_minutes == 0 {
            return Err(ConfigError::Invalid(
                "token lifetimes must be at least one minute".to_string(),
            ));
        }
        if self.access_ttl_minutes > MAX_TTL_MINUTES
            || self.refresh_ttl_minutes > MAX_TTL_MINUTES
        {
            return Err(ConfigError::Invalid(format!(
                "token lifetimes must not exceed {MAX_TTL_MINUTES} minutes"
            )));
        }
        Ok(())
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            access_ttl_minutes: default_access_ttl_minutes(),
            refresh_ttl_minutes: default_refresh_ttl_minutes(),
        }
    }
}

// Secrets never reach the logs.
impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_minutes", &self.refresh_ttl_minutes)
            .finish()
    }
}

/// Process-wide token bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.capacity must be at least 1".to_string(),
            ));
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "rate_limit.refill_per_second must be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_second: default_refill_per_second(),
        }
    }
}

/// Circuit breaker thresholds and timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_name")]
    pub name: String,
    /// Trials admitted while half-open; this many successes close the breaker.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Length of the closed-state counting window. `0` never clears counts.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How long the breaker stays open before probing.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,
}

impl BreakerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid(
                "breaker.max_requests must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "breaker.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs > MAX_BREAKER_PERIOD_SECS
            || self.interval_secs > MAX_BREAKER_PERIOD_SECS
        {
            return Err(ConfigError::Invalid(format!(
                "breaker.timeout_secs and breaker.interval_secs must not exceed \
                 {MAX_BREAKER_PERIOD_SECS}"
            )));
        }
        if !(0.0..1.0).contains(&self.failure_threshold) {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: default_breaker_name(),
            max_requests: default_max_requests(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            min_requests: default_min_requests(),
        }
    }
}

fn default_access_ttl_minutes() -> u64 {
    15
}

fn default_refresh_ttl_minutes() -> u64 {
    60 * 24
}

fn default_capacity() -> u32 {
    100
}

fn default_refill_per_second() -> f64 {
    50.0
}

fn default_breaker_name() -> String {
    "gatehouse".to_string()
}

fn default_max_requests() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_failure_threshold() -> f64 {
    0.6
}

fn default_min_requests() -> u32 {
    10
}
