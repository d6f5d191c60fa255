//! Fetch configuration.
//!
//! Provides:
//! - Defaults tuned for bot-hostile job boards
//! - Environment loading (`FetchConfig::from_env`)
//! - Feature flags for every resilience layer
//! - Validation of delay ranges and retry budgets

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::modules::circuit_breaker::CircuitBreakerConfig;
use crate::modules::rate_limiter::RateLimitConfig;

const FAST_SCRAPING_DELAY: f64 = 0.5;
const FAST_MIN_DELAY: f64 = 0.3;
const FAST_MAX_DELAY: f64 = 1.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("MIN_DELAY ({min:?}) must be lower than MAX_DELAY ({max:?})")]
    InvalidDelayRange { min: Duration, max: Duration },
    #[error("MAX_RETRIES must be at least 1")]
    NoRetries,
    #[error("CIRCUIT_BREAKER_THRESHOLD must be at least 1")]
    ZeroThreshold,
}

/// Toggles for each resilience layer. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub user_agent_rotation: bool,
    pub session_persistence: bool,
    pub circuit_breaker: bool,
    pub adaptive_rate_limiting: bool,
    pub referer_headers: bool,
    pub fingerprint_consistency: bool,
    pub session_warmup: bool,
    /// Random delay in `[min_delay, max_delay]` instead of the fixed
    /// `scraping_delay` when adaptive limiting is off.
    pub random_delay: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            user_agent_rotation: true,
            session_persistence: true,
            circuit_breaker: true,
            adaptive_rate_limiting: true,
            referer_headers: true,
            fingerprint_consistency: true,
            session_warmup: true,
            random_delay: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Base for retry backoff and the fixed inter-request delay.
    pub scraping_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub data_dir: PathBuf,
    pub session_ttl: Duration,
    pub features: FeatureFlags,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scraping_delay: Duration::from_secs(2),
            min_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(4),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(300),
            data_dir: PathBuf::from("data"),
            session_ttl: Duration::from_secs(24 * 3600),
            features: FeatureFlags::default(),
        }
    }
}

impl FetchConfig {
    /// Reads the process environment. Unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup and validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let source = Lookup(&lookup);

        if let Some(delay) = source.seconds("SCRAPING_DELAY")? {
            config.scraping_delay = delay;
        }
        if let Some(delay) = source.seconds("MIN_DELAY")? {
            config.min_delay = delay;
        }
        if let Some(delay) = source.seconds("MAX_DELAY")? {
            config.max_delay = delay;
        }
        if let Some(retries) = source.integer("MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(timeout) = source.seconds("REQUEST_TIMEOUT")? {
            config.request_timeout = timeout;
        }
        if let Some(threshold) = source.integer("CIRCUIT_BREAKER_THRESHOLD")? {
            config.circuit_breaker_threshold = threshold;
        }
        if let Some(timeout) = source.seconds("CIRCUIT_BREAKER_TIMEOUT")? {
            config.circuit_breaker_timeout = timeout;
        }
        if let Some(dir) = source.raw("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(hours) = source.integer("SESSION_TTL_HOURS")? {
            config.session_ttl = Duration::from_secs(u64::from(hours) * 3600);
        }

        let flags = &mut config.features;
        for (key, flag) in [
            ("USE_USER_AGENT_ROTATION", &mut flags.user_agent_rotation),
            ("USE_SESSION_PERSISTENCE", &mut flags.session_persistence),
            ("USE_CIRCUIT_BREAKER", &mut flags.circuit_breaker),
            ("USE_ADAPTIVE_RATE_LIMITING", &mut flags.adaptive_rate_limiting),
            ("USE_REFERER_HEADERS", &mut flags.referer_headers),
            ("USE_FINGERPRINT_CONSISTENCY", &mut flags.fingerprint_consistency),
            ("USE_SESSION_WARMUP", &mut flags.session_warmup),
            ("RANDOM_DELAY_ENABLED", &mut flags.random_delay),
        ] {
            if let Some(value) = source.boolean(key)? {
                *flag = value;
            }
        }

        if source.boolean("FAST_MODE")?.unwrap_or(false) {
            config = config.fast_mode();
        }

        config.validate()?;
        Ok(config)
    }

    /// Short fixed delays for trusted or local targets.
    pub fn fast_mode(mut self) -> Self {
        self.scraping_delay = Duration::from_secs_f64(FAST_SCRAPING_DELAY);
        self.min_delay = Duration::from_secs_f64(FAST_MIN_DELAY);
        self.max_delay = Duration::from_secs_f64(FAST_MAX_DELAY);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay >= self.max_delay {
            return Err(ConfigError::InvalidDelayRange {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(())
    }

    /// Directory holding persisted cookie sessions.
    pub fn cookie_dir(&self) -> PathBuf {
        self.data_dir.join("cookies")
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            timeout: self.circuit_breaker_timeout,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::default().with_base(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64())
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn seconds(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        let secs: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: "expected a number of seconds",
        })?;
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value,
                reason: "must be a finite, non-negative number",
            })
    }

    fn integer(&self, key: &'static str) -> Result<Option<u32>, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key,
                value,
                reason: "expected a non-negative integer",
            })
    }

    fn boolean(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key,
                value,
                reason: "expected true or false",
            }),
        }
    }
}
