//! Per-request capture context.

use crate::capture::BodyCapture;
use crate::latency::LatencyTimer;
use crate::mask::group_pairs;
use http::header::CONTENT_TYPE;
use http::request;
use http::response;
use http::HeaderMap;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

/// Remote address of the connection, inserted into request extensions by the
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Everything captured about a request.
///
/// Owned by a single request's flow and only mutated until its body capture
/// completes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    /// Lower-cased header names; repeated values joined with `", "`.
    pub headers: BTreeMap<String, String>,
    /// Decoded query parameters, values in the order received.
    pub query_params: BTreeMap<String, Vec<String>>,
    pub content_type: Option<String>,
    pub client_ip: String,
    pub correlation_id: String,
    pub timer: LatencyTimer,
    pub body: BodyCapture,
}

impl RequestContext {
    /// Capture the head of a request. The body starts out as
    /// [`BodyCapture::Skipped`] until the capturer fills it in.
    pub fn from_parts(parts: &request::Parts, correlation_id: String, timer: LatencyTimer) -> Self {
        let client_ip = extract_client_ip(&parts.headers)
            .or_else(|| parts.extensions.get::<ClientAddr>().map(|addr| addr.0.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            headers: flatten_headers(&parts.headers),
            query_params: parse_query(parts.uri.query()),
            content_type: content_type(&parts.headers),
            client_ip,
            correlation_id,
            timer,
            body: BodyCapture::Skipped,
        }
    }
}

/// What was observed of the handler's response.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    /// `None` when response capture is disabled.
    pub body: Option<BodyCapture>,
    /// Seconds from request start until the handler returned.
    pub latency: f64,
}

impl ResponseContext {
    pub fn from_parts(parts: &response::Parts, body: Option<BodyCapture>, latency: f64) -> Self {
        Self {
            status_code: parts.status.as_u16(),
            headers: flatten_headers(&parts.headers),
            content_type: content_type(&parts.headers),
            body,
            latency,
        }
    }
}

pub(crate) fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flattened: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("[non-utf8]");
        flattened
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flattened
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();
    group_pairs(pairs)
}

/// Client IP from proxy headers: first `x-forwarded-for` hop, then `x-real-ip`.
fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    forwarded
        .into_iter()
        .chain(real_ip)
        .find(|candidate| candidate.parse::<IpAddr>().is_ok())
        .map(String::from)
}
