//! Fetch modes and per-attempt results

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How a page is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Plain HTTP GET, no script execution
    Static,
    /// Rendered in a browser session so client-side scripts run
    Scripted,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Static => write!(f, "static"),
            FetchMode::Scripted => write!(f, "scripted"),
        }
    }
}

/// What a site profile knows about rendering requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingHint {
    Static,
    Scripted,
    #[default]
    Unknown,
}

impl RenderingHint {
    /// The fetch mode this hint pins, if any
    pub fn fixed_mode(self) -> Option<FetchMode> {
        match self {
            RenderingHint::Static => Some(FetchMode::Static),
            RenderingHint::Scripted => Some(FetchMode::Scripted),
            RenderingHint::Unknown => None,
        }
    }
}

/// One fetch attempt, as handed from the transport to classification.
///
/// Lives only for the duration of classification and extraction.
#[derive(Debug, Clone)]
pub struct FetchAttemptResult {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// Mode the attempt used
    pub mode: FetchMode,
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lowercased
    pub headers: HashMap<String, String>,
    /// Decoded response body
    pub body: String,
    /// Wall time of the attempt
    pub elapsed: Duration,
}

impl FetchAttemptResult {
    /// Look up a header by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Content-Type header, if present
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the declared content type is some flavour of HTML.
    ///
    /// A missing content type is given the benefit of the doubt.
    pub fn is_html(&self) -> bool {
        match self.content_type() {
            None => true,
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
        }
    }

    /// `Retry-After` in delta-seconds form; HTTP-date values are ignored
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
