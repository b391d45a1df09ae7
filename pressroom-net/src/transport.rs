//! Transport boundary
//!
//! Everything that performs network I/O sits behind [`Transport`]. Errors
//! carry a kind so callers can map them onto defense signals instead of
//! propagating raw client errors.

use async_trait::async_trait;
use pressroom_core::{DefenseSignal, FetchAttemptResult, FetchMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One request handed to a transport
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub mode: FetchMode,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, mode: FetchMode, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            mode,
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Set or replace a header (case-insensitive name)
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What the transport got back
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
    /// Header names lowercased
    pub headers: HashMap<String, String>,
    pub body: String,
    pub elapsed: Duration,
}

impl RawResponse {
    /// Hand the response over to classification
    pub fn into_attempt(self, request: &FetchRequest) -> FetchAttemptResult {
        FetchAttemptResult {
            url: request.url.clone(),
            final_url: self.final_url,
            mode: request.mode,
            status: self.status,
            headers: self
                .headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body: self.body,
            elapsed: self.elapsed,
        }
    }
}

/// Broad category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Timeout,
    Other,
}

impl TransportErrorKind {
    /// Signal recorded against the domain when no response arrived.
    ///
    /// A timeout counts as a malformed response; every other failure means
    /// the domain is currently uncooperative and is scheduled like a rate limit.
    pub fn signal(&self) -> DefenseSignal {
        match self {
            TransportErrorKind::Timeout => DefenseSignal::Malformed,
            TransportErrorKind::Dns | TransportErrorKind::Connect | TransportErrorKind::Other => {
                DefenseSignal::RateLimited
            }
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors from the transport layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("DNS lookup failed for {url}: {message}")]
    Dns { url: String, message: String },

    #[error("Connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("Timeout after {after:?} fetching {url}")]
    Timeout { url: String, after: Duration },

    #[error("Request to {url} failed: {message}")]
    Other { url: String, message: String },
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Dns { .. } => TransportErrorKind::Dns,
            TransportError::Connect { .. } => TransportErrorKind::Connect,
            TransportError::Timeout { .. } => TransportErrorKind::Timeout,
            TransportError::ClientBuild(_) | TransportError::Other { .. } => TransportErrorKind::Other,
        }
    }

    pub fn signal(&self) -> DefenseSignal {
        self.kind().signal()
    }
}

/// Performs fetches in static or scripted mode
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_malformed() {
        let err = TransportError::Timeout {
            url: "https://example.com".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), TransportErrorKind::Timeout);
        assert_eq!(err.signal(), DefenseSignal::Malformed);
    }

    #[test]
    fn test_connection_failures_map_to_rate_limited() {
        let dns = TransportError::Dns {
            url: "https://nx.invalid".into(),
            message: "no record".into(),
        };
        let refused = TransportError::Connect {
            url: "https://example.com".into(),
            message: "refused".into(),
        };
        assert_eq!(dns.signal(), DefenseSignal::RateLimited);
        assert_eq!(refused.signal(), DefenseSignal::RateLimited);
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request = FetchRequest::new("https://example.com", FetchMode::Static, Duration::from_secs(5))
            .with_headers(vec![("Accept-Language".into(), "en-US".into())]);
        request.set_header("accept-language", "en-GB");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("ACCEPT-LANGUAGE"), Some("en-GB"));
    }

    #[test]
    fn test_into_attempt_lowercases_headers() {
        let request = FetchRequest::new("https://example.com/a", FetchMode::Scripted, Duration::from_secs(5));
        let response = RawResponse {
            status: 200,
            final_url: "https://example.com/b".into(),
            headers: HashMap::from([("Content-Type".to_string(), "text/html".to_string())]),
            body: "<html></html>".into(),
            elapsed: Duration::from_millis(12),
        };
        let attempt = response.into_attempt(&request);
        assert_eq!(attempt.url, "https://example.com/a");
        assert_eq!(attempt.final_url, "https://example.com/b");
        assert_eq!(attempt.mode, FetchMode::Scripted);
        assert_eq!(attempt.headers.get("content-type").map(String::as_str), Some("text/html"));
    }
}
