//! Error types for Wiretap
//!
//! Every error here is recovered inside the interceptor. Handler errors are
//! not represented: they belong to the wrapped service and cross the
//! interceptor unchanged.

use thiserror::Error;

/// Invalid [`InterceptorConfig`](crate::InterceptorConfig) values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be within [0.0, 1.0], got {0}")]
    SampleRate(f64),

    #[error("latency threshold must be a positive number of seconds, got {0}")]
    LatencyThreshold(f64),

    #[error("aggregation interval must be between 0.001 and 604800 seconds, got {0}")]
    AggregationInterval(f64),

    #[error("queue capacity must be at least 1")]
    QueueCapacity,

    #[error("invalid header name: {0}")]
    HeaderName(String),
}

/// A body could not be read while it was being captured.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("body stream failed after {buffered} bytes")]
    Stream { buffered: usize },
}

/// A body that looked structured could not be decoded for masking.
#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed form body: {0}")]
    Form(#[from] serde_urlencoded::de::Error),
}

/// Log delivery failure reported by a [`LogSink`](crate::LogSink).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

pub type SinkResult<T = ()> = std::result::Result<T, SinkError>;
