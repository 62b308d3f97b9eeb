//! Configuration from the environment.
//!
//! Reads `WIRETAP_*` variables, after loading a `.env` file if one exists,
//! and overlays them on the [`InterceptorConfig`] defaults.
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `WIRETAP_SAMPLE_RATE` | sample rate, 0.0 to 1.0 |
//! | `WIRETAP_LATENCY_THRESHOLD` | alert threshold in seconds |
//! | `WIRETAP_MAX_BODY_SIZE` | largest logged body in bytes |
//! | `WIRETAP_MASKED_FIELDS` | comma-separated field names |
//! | `WIRETAP_EXCLUDED_PATHS` | comma-separated path patterns |
//! | `WIRETAP_AGGREGATION_INTERVAL` | summary period in seconds |
//! | `WIRETAP_APP_VERSION` | reported application version |
//! | `WIRETAP_HOSTNAME` | reported host name |
//! | `WIRETAP_QUEUE_CAPACITY` | event queue capacity |
//! | `WIRETAP_EMIT_EMPTY_SUMMARIES` | `true` or `false` |
//!
//! # Example
//!
//! ```ignore
//! use wiretap::config::EnvConfig;
//!
//! let config = EnvConfig::from_env()?.into_config()?;
//! ```

use serde::Deserialize;
use wiretap_core::InterceptorConfig;

/// Variable prefix.
pub const ENV_PREFIX: &str = "WIRETAP_";

/// Error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum EnvConfigError {
    /// A variable could not be parsed.
    #[error("Configuration error: {0}")]
    Env(#[from] envy::Error),

    /// The resulting configuration is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] wiretap_core::ConfigError),
}

/// Settings read from `WIRETAP_*` variables. Unset variables keep the
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvConfig {
    pub sample_rate: Option<f64>,
    pub latency_threshold: Option<f64>,
    pub max_body_size: Option<usize>,
    pub masked_fields: Option<Vec<String>>,
    pub excluded_paths: Option<Vec<String>>,
    pub aggregation_interval: Option<f64>,
    pub app_version: Option<String>,
    pub hostname: Option<String>,
    pub queue_capacity: Option<usize>,
    pub emit_empty_summaries: Option<bool>,
}

impl EnvConfig {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// Existing environment variables take precedence over `.env` values.
    pub fn from_env() -> Result<Self, EnvConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Read settings from an explicit set of variables.
    pub fn from_vars(
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, EnvConfigError> {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    /// Overlay these settings on the defaults and validate the result.
    pub fn into_config(self) -> Result<InterceptorConfig, EnvConfigError> {
        let mut config = InterceptorConfig::new();

        if let Some(rate) = self.sample_rate {
            config = config.sample_rate(rate);
        }
        if let Some(seconds) = self.latency_threshold {
            config = config.latency_threshold(seconds);
        }
        if let Some(size) = self.max_body_size {
            config = config.max_body_size(size);
        }
        if let Some(fields) = self.masked_fields {
            config = config.masked_fields(trimmed(fields));
        }
        if let Some(paths) = self.excluded_paths {
            config = config.excluded_paths(trimmed(paths));
        }
        if let Some(seconds) = self.aggregation_interval {
            config = config.aggregation_interval(seconds);
        }
        if let Some(version) = self.app_version {
            config = config.app_version(version);
        }
        if let Some(hostname) = self.hostname {
            config = config.hostname(hostname);
        }
        if let Some(capacity) = self.queue_capacity {
            config = config.queue_capacity(capacity);
        }
        if let Some(emit) = self.emit_empty_summaries {
            config = config.emit_empty_summaries(emit);
        }

        config.validate()?;
        Ok(config)
    }
}

fn trimmed(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
