//! Correlation id resolution.

use http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Resolves the correlation id of a request and stamps it on the response.
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    incoming: Vec<HeaderName>,
    outgoing: HeaderName,
}

impl CorrelationTracker {
    pub fn new(incoming: Vec<HeaderName>, outgoing: HeaderName) -> Self {
        Self { incoming, outgoing }
    }

    /// Reuse the first recognized correlation header verbatim, or generate a
    /// new UUID v4.
    pub fn resolve(&self, headers: &HeaderMap) -> String {
        self.incoming
            .iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .find(|value| !value.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Attach the correlation id to outgoing response headers.
    pub fn attach(&self, headers: &mut HeaderMap, correlation_id: &str) {
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            headers.insert(self.outgoing.clone(), value);
        }
    }

    pub fn response_header(&self) -> &HeaderName {
        &self.outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CorrelationTracker {
        CorrelationTracker::new(
            vec![
                HeaderName::from_static("x-correlation-id"),
                HeaderName::from_static("x-request-id"),
            ],
            HeaderName::from_static("x-correlation-id"),
        )
    }

    #[test]
    fn test_reuses_incoming_header_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "Req-ABC 123".parse().unwrap());

        assert_eq!(tracker().resolve(&headers), "Req-ABC 123");
    }

    #[test]
    fn test_header_order_is_respected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "second".parse().unwrap());
        headers.insert("x-correlation-id", "first".parse().unwrap());

        assert_eq!(tracker().resolve(&headers), "first");
    }

    #[test]
    fn test_generates_uuid_when_absent_or_blank() {
        let mut headers = HeaderMap::new();
        headers.insert("x-correlation-id", "   ".parse().unwrap());

        let id = tracker().resolve(&headers);
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(id.len(), 36);
        assert_ne!(id, tracker().resolve(&HeaderMap::new()));
    }

    #[test]
    fn test_attach_sets_response_header() {
        let mut headers = HeaderMap::new();
        tracker().attach(&mut headers, "abc-123");

        assert_eq!(headers.get("x-correlation-id").unwrap(), "abc-123");
    }
}
