//! # Wiretap Core
//!
//! Core engine of Wiretap: the request/response interception pipeline.
//!
//! Every request passing through an [`Interceptor`] has its status counted.
//! A sampled fraction is captured in full (masked headers, query parameters
//! and bodies) and emitted as a structured [`LogRecord`] through a
//! [`LogSink`], together with latency alerts and periodic status summaries.
//!
//! This crate is not meant to be used directly. Use `wiretap-rs` instead.

mod aggregator;
mod capture;
mod config;
mod context;
mod correlation;
pub mod error;
mod latency;
mod layer;
mod mask;
mod pipeline;
mod queue;
mod record;
mod sampling;
mod sink;

// Public API
pub use aggregator::{StatusAggregator, StatusSummary};
pub use capture::{
    capture, BodyCapture, ReplayBody, TeeBody, BINARY_BODY, BODY_TOO_LARGE, SKIPPED_BODY,
    UNREADABLE_BODY,
};
pub use config::{
    InterceptorConfig, PathPattern, MAX_AGGREGATION_INTERVAL, MIN_AGGREGATION_INTERVAL,
};
pub use context::{ClientAddr, RequestContext, ResponseContext};
pub use correlation::CorrelationTracker;
pub use error::{CaptureError, ConfigError, MaskingError, SinkError, SinkResult};
pub use latency::{LatencyClass, LatencyMonitor, LatencyTimer};
pub use layer::{WiretapLayer, WiretapService};
pub use mask::{Masker, MASK};
pub use pipeline::{Interceptor, Stage};
pub use queue::{PipelineStats, PipelineStatsSnapshot};
pub use record::{
    ErrorKind, ErrorSection, ExchangeOutcome, LatencyAlert, LogRecord, LogRecordBuilder,
    MaskedRequest, Metadata, RequestSection, ResponseSection, Severity,
};
pub use sampling::SamplingDecider;
pub use sink::{JsonLinesSink, LogSink, MemorySink, NullSink, SinkEvent, TracingSink};
