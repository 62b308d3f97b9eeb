//! Structured log records.
//!
//! A [`LogRecord`] is assembled once per captured exchange from an already
//! masked view of the request and the exchange outcome. The builder is pure:
//! the same inputs and timestamp always produce the same record.

use crate::context::RequestContext;
use crate::pipeline::Stage;
use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Level a record is logged at. Not part of the serialized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One log entry per captured request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub event_type: &'static str,
    /// Seconds since the Unix epoch.
    pub event_timestamp: f64,
    pub request: RequestSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSection>,
    pub metadata: Metadata,
    #[serde(skip)]
    pub severity: Severity,
}

impl LogRecord {
    pub const EVENT_TYPE: &'static str = "http_request";

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSection {
    pub method: String,
    pub url: String,
    pub headers: Value,
    pub query_params: Value,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSection {
    pub status_code: u16,
    pub latency: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Why an exchange produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HandlerError,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSection {
    pub kind: ErrorKind,
    /// Type of the handler error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Stage the exchange was in when it was abandoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub latency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub correlation_id: String,
    pub client_ip: String,
    pub hostname: String,
    pub app_version: String,
}

/// Request view after masking.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedRequest {
    pub headers: Value,
    pub query_params: Value,
    pub body: String,
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The handler produced a response. `body` is `None` when response
    /// capture is disabled.
    Completed {
        status_code: u16,
        latency: f64,
        body: Option<String>,
    },
    /// The handler returned an error.
    HandlerFailed { class: String, latency: f64 },
    /// The exchange was dropped before it finished.
    Aborted { stage: Stage, latency: f64 },
}

impl ExchangeOutcome {
    pub fn latency(&self) -> f64 {
        match self {
            ExchangeOutcome::Completed { latency, .. }
            | ExchangeOutcome::HandlerFailed { latency, .. }
            | ExchangeOutcome::Aborted { latency, .. } => *latency,
        }
    }
}

/// Raised for an exchange slower than the latency threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyAlert {
    pub event_type: &'static str,
    pub event_timestamp: f64,
    pub method: String,
    pub url: String,
    pub latency: f64,
    pub threshold: f64,
    pub correlation_id: String,
}

impl LatencyAlert {
    pub const EVENT_TYPE: &'static str = "latency_alert";
}

/// Assembles [`LogRecord`]s with the process-wide metadata.
#[derive(Debug, Clone)]
pub struct LogRecordBuilder {
    hostname: String,
    app_version: String,
    latency_threshold: f64,
}

impl LogRecordBuilder {
    pub fn new(
        hostname: impl Into<String>,
        app_version: impl Into<String>,
        latency_threshold: f64,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            app_version: app_version.into(),
            latency_threshold,
        }
    }

    pub fn build(
        &self,
        request: &RequestContext,
        masked: &MaskedRequest,
        outcome: &ExchangeOutcome,
    ) -> LogRecord {
        self.build_at(request, masked, outcome, unix_now())
    }

    pub fn build_at(
        &self,
        request: &RequestContext,
        masked: &MaskedRequest,
        outcome: &ExchangeOutcome,
        timestamp: f64,
    ) -> LogRecord {
        let (response, error) = match outcome {
            ExchangeOutcome::Completed {
                status_code,
                latency,
                body,
            } => {
                let response = ResponseSection {
                    status_code: *status_code,
                    latency: *latency,
                    body: body.clone(),
                };
                (Some(response), None)
            }
            ExchangeOutcome::HandlerFailed { class, latency } => {
                let error = ErrorSection {
                    kind: ErrorKind::HandlerError,
                    class: Some(class.clone()),
                    stage: None,
                    latency: *latency,
                };
                (None, Some(error))
            }
            ExchangeOutcome::Aborted { stage, latency } => {
                let error = ErrorSection {
                    kind: ErrorKind::Aborted,
                    class: None,
                    stage: Some(*stage),
                    latency: *latency,
                };
                (None, Some(error))
            }
        };

        LogRecord {
            event_type: LogRecord::EVENT_TYPE,
            event_timestamp: timestamp,
            request: RequestSection {
                method: request.method.clone(),
                url: request.path.clone(),
                headers: masked.headers.clone(),
                query_params: masked.query_params.clone(),
                body: masked.body.clone(),
            },
            response,
            error,
            metadata: Metadata {
                correlation_id: request.correlation_id.clone(),
                client_ip: request.client_ip.clone(),
                hostname: self.hostname.clone(),
                app_version: self.app_version.clone(),
            },
            severity: self.severity(outcome),
        }
    }

    pub fn build_alert(&self, request: &RequestContext, latency: f64) -> LatencyAlert {
        LatencyAlert {
            event_type: LatencyAlert::EVENT_TYPE,
            event_timestamp: unix_now(),
            method: request.method.clone(),
            url: request.path.clone(),
            latency,
            threshold: self.latency_threshold,
            correlation_id: request.correlation_id.clone(),
        }
    }

    fn severity(&self, outcome: &ExchangeOutcome) -> Severity {
        match outcome {
            ExchangeOutcome::HandlerFailed { .. } => Severity::Error,
            ExchangeOutcome::Aborted { .. } => Severity::Warn,
            ExchangeOutcome::Completed {
                status_code,
                latency,
                ..
            } => {
                if *status_code >= 500 {
                    Severity::Error
                } else if *status_code >= 400 || *latency > self.latency_threshold {
                    Severity::Warn
                } else {
                    Severity::Info
                }
            }
        }
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
