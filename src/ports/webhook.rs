//! Inbound webhook request abstraction.
//!
//! The core never sees a web framework. Routing hands adapters this value
//! type: the raw body plus the headers that carry authenticity proofs.

use http::HeaderMap;

/// One inbound provider notification, as delivered.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    headers: HeaderMap,
    body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(headers: HeaderMap, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Builds a request from a body alone, for providers that authenticate
    /// by payload content rather than headers.
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// A header value as a string, `None` when absent or non-UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The raw body bytes, exactly as delivered. Signature verification
    /// must run over these, never over a re-serialized form.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body parsed as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-callback-token", HeaderValue::from_static("secret"));
        let req = WebhookRequest::new(headers, Vec::new());

        assert_eq!(req.header("X-Callback-Token"), Some("secret"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn parses_json_body() {
        let req = WebhookRequest::from_body(r#"{"event":"ping"}"#);
        let v: serde_json::Value = req.json().unwrap();
        assert_eq!(v["event"], "ping");
    }
}
