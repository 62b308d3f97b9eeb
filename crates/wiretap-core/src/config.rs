//! Configuration for the interceptor.
//!
//! [`InterceptorConfig`] is resolved before the interceptor is built and is
//! immutable afterwards. Loading it from the environment is left to the
//! caller (see the `config` feature of `wiretap-rs`).

use crate::error::ConfigError;
use http::HeaderName;
use std::collections::HashSet;
use std::time::Duration;

/// Shortest accepted aggregation interval, in seconds.
pub const MIN_AGGREGATION_INTERVAL: f64 = 0.001;

/// Longest accepted aggregation interval (one week), in seconds.
pub const MAX_AGGREGATION_INTERVAL: f64 = 604_800.0;

const DEFAULT_AGGREGATION_PERIOD: Duration = Duration::from_secs(60);

/// Path pattern used to exclude requests from capture.
///
/// A pattern ending in `*` matches every path starting with the text before
/// the star; anything else must match the path exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match pattern.strip_suffix('*') {
            Some(prefix) => PathPattern::Prefix(prefix.to_string()),
            None => PathPattern::Exact(pattern),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        PathPattern::parse(pattern)
    }
}

/// Configuration for the [`Interceptor`](crate::Interceptor).
///
/// Use the builder pattern to customize behavior:
///
/// ```
/// use wiretap_core::InterceptorConfig;
///
/// let config = InterceptorConfig::new()
///     .sample_rate(0.5)
///     .latency_threshold(1.5)
///     .max_body_size(4096)
///     .mask_field("ssn")
///     .skip_path("/metrics")
///     .skip_path("/internal/*");
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    /// Probability (0.0-1.0) that a request is captured in full.
    pub(crate) sample_rate: f64,

    /// Requests slower than this many seconds raise a latency alert.
    pub(crate) latency_threshold: f64,

    /// Largest body (in bytes) that is logged. 0 disables body buffering.
    pub(crate) max_body_size: usize,

    /// Lower-cased key names whose values are masked.
    pub(crate) masked_fields: HashSet<String>,

    /// Paths that bypass capture (status is still aggregated).
    pub(crate) excluded_paths: Vec<PathPattern>,

    /// Seconds between two status summary flushes.
    pub(crate) aggregation_interval: f64,

    /// Emit a summary even when no request completed in the window.
    pub(crate) emit_empty_summaries: bool,

    /// Incoming headers checked, in order, for an existing correlation id.
    pub(crate) correlation_headers: Vec<HeaderName>,

    /// Header carrying the correlation id on responses.
    pub(crate) response_correlation_header: HeaderName,

    /// Whether response bodies are captured.
    pub(crate) capture_response_body: bool,

    /// Response content types whose bodies are captured.
    pub(crate) loggable_content_types: HashSet<String>,

    /// Capacity of the event queue in front of the sink.
    pub(crate) queue_capacity: usize,

    /// Host name reported in record metadata (resolved from the OS if unset).
    pub(crate) hostname: Option<String>,

    /// Application version reported in record metadata.
    pub(crate) app_version: String,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorConfig {
    /// Create a new configuration with default values.
    ///
    /// Defaults:
    /// - Sample rate: 1.0 (all requests)
    /// - Latency threshold: 2.0 seconds
    /// - Max body size: 1024 bytes
    /// - Masked fields: password, token, authorization, cookie, x-api-key
    /// - Excluded paths: /health, /favicon.ico
    /// - Aggregation interval: 60 seconds, empty windows emitted
    /// - Correlation headers: x-correlation-id, x-request-id
    /// - Response bodies captured for application/json and text/plain
    /// - Queue capacity: 10000 events
    pub fn new() -> Self {
        let masked_fields = ["password", "token", "authorization", "cookie", "x-api-key"]
            .into_iter()
            .map(String::from)
            .collect();

        let loggable_content_types = ["application/json", "text/plain"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            sample_rate: 1.0,
            latency_threshold: 2.0,
            max_body_size: 1024,
            masked_fields,
            excluded_paths: vec![
                PathPattern::Exact("/health".to_string()),
                PathPattern::Exact("/favicon.ico".to_string()),
            ],
            aggregation_interval: 60.0,
            emit_empty_summaries: true,
            correlation_headers: vec![
                HeaderName::from_static("x-correlation-id"),
                HeaderName::from_static("x-request-id"),
            ],
            response_correlation_header: HeaderName::from_static("x-correlation-id"),
            capture_response_body: true,
            loggable_content_types,
            queue_capacity: 10_000,
            hostname: None,
            app_version: "unknown".to_string(),
        }
    }

    /// Set the sampling rate (0.0 to 1.0).
    ///
    /// Out-of-range values are rejected by [`validate`](Self::validate).
    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the latency threshold in seconds.
    pub fn latency_threshold(mut self, seconds: f64) -> Self {
        self.latency_threshold = seconds;
        self
    }

    /// Set the maximum body size to log.
    ///
    /// Bodies larger than this are logged as `"Body too large to log"`.
    /// With a size of 0 nothing is buffered and every non-empty body is
    /// logged as that placeholder.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Add a field name to mask. Matching is case-insensitive.
    ///
    /// Masked fields are redacted in headers, query parameters, and JSON or
    /// form bodies. A body that looks like JSON (or is declared as JSON or
    /// form data) but fails to parse is logged as `"Unable to read body"`.
    pub fn mask_field(mut self, field: impl Into<String>) -> Self {
        self.masked_fields.insert(field.into().to_lowercase());
        self
    }

    /// Replace the set of masked field names.
    pub fn masked_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.masked_fields = fields.into_iter().map(|f| f.into().to_lowercase()).collect();
        self
    }

    /// Add a path pattern to exclude. A trailing `*` makes it a prefix match.
    pub fn skip_path(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_paths.push(PathPattern::parse(pattern));
        self
    }

    /// Replace the excluded path patterns.
    pub fn excluded_paths(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.excluded_paths = patterns.into_iter().map(PathPattern::parse).collect();
        self
    }

    /// Set the status aggregation flush interval in seconds.
    ///
    /// [`validate`](Self::validate) accepts 0.001 to 604800 seconds.
    pub fn aggregation_interval(mut self, seconds: f64) -> Self {
        self.aggregation_interval = seconds;
        self
    }

    /// Whether a summary is emitted for windows without traffic.
    pub fn emit_empty_summaries(mut self, emit: bool) -> Self {
        self.emit_empty_summaries = emit;
        self
    }

    /// Replace the incoming correlation headers, checked in order.
    pub fn correlation_headers(
        mut self,
        headers: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self, ConfigError> {
        self.correlation_headers = headers
            .into_iter()
            .map(|h| parse_header_name(h.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Set the response header carrying the correlation id.
    pub fn response_correlation_header(mut self, header: &str) -> Result<Self, ConfigError> {
        self.response_correlation_header = parse_header_name(header)?;
        Ok(self)
    }

    /// Enable or disable response body capture.
    pub fn capture_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = capture;
        self
    }

    /// Set the response content types whose bodies are captured.
    pub fn loggable_content_types(
        mut self,
        types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.loggable_content_types = types.into_iter().map(|t| t.into().to_lowercase()).collect();
        self
    }

    /// Set the capacity of the event queue. When full, the oldest event is dropped.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the host name reported in record metadata.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the application version reported in record metadata.
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Check the numeric ranges of every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(self.latency_threshold > 0.0 && self.latency_threshold.is_finite()) {
            return Err(ConfigError::LatencyThreshold(self.latency_threshold));
        }
        if !(MIN_AGGREGATION_INTERVAL..=MAX_AGGREGATION_INTERVAL)
            .contains(&self.aggregation_interval)
        {
            return Err(ConfigError::AggregationInterval(self.aggregation_interval));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        Ok(())
    }

    pub fn get_sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn get_latency_threshold(&self) -> f64 {
        self.latency_threshold
    }

    pub fn get_max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Aggregation interval as a [`Duration`], clamped to the accepted range.
    pub fn aggregation_period(&self) -> Duration {
        let seconds = self
            .aggregation_interval
            .clamp(MIN_AGGREGATION_INTERVAL, MAX_AGGREGATION_INTERVAL);
        Duration::try_from_secs_f64(seconds).unwrap_or(DEFAULT_AGGREGATION_PERIOD)
    }

    /// Check if a path is excluded from capture.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|p| p.matches(path))
    }

    /// Check if a response with this content type should have its body captured.
    pub(crate) fn is_loggable_content_type(&self, content_type: &str) -> bool {
        let ct = content_type.to_lowercase();
        self.loggable_content_types
            .iter()
            .any(|loggable| ct.contains(loggable.as_str()))
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.trim().to_lowercase().as_bytes())
        .map_err(|_| ConfigError::HeaderName(name.to_string()))
}
