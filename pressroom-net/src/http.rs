//! reqwest-backed transport
//!
//! Static fetches are plain GETs. Scripted fetches go through a remote
//! rendering service when one is configured (`GET {endpoint}?url=..&wait=..`
//! returning the rendered HTML); without one they degrade to a static fetch.

use async_trait::async_trait;
use pressroom_core::{FetchMode, TransportConfig};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::error::Error as _;
use std::time::Instant;
use tracing::{debug, warn};

use crate::transport::{FetchRequest, RawResponse, Transport, TransportError};

/// HTTP transport with cookie store, compression and redirect limit
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(Policy::limited(config.max_redirects));

        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| TransportError::ClientBuild(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether scripted fetches actually render
    pub fn can_render(&self) -> bool {
        self.config.render_endpoint.is_some()
    }

    async fn get(&self, target: &str, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        let started = Instant::now();

        let mut builder = self.client.get(target).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(request, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let limit = self.config.max_body_bytes;
        let mut bytes = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(request, &e))?
        {
            if !push_capped(&mut bytes, &chunk, limit) {
                truncated = true;
                break;
            }
        }
        if truncated {
            warn!("Body of {} cut off at {} bytes", request.url, limit);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        debug!(
            url = %request.url,
            status,
            bytes = body.len(),
            truncated,
            "Fetched"
        );

        Ok(RawResponse {
            status,
            final_url,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        match (request.mode, &self.config.render_endpoint) {
            (FetchMode::Scripted, Some(endpoint)) => {
                let target = render_url(endpoint, &request.url, self.config.render_wait_ms);
                let mut response = self.get(&target, request).await?;
                // The rendering service reports its own URL; keep the page's
                response.final_url = response
                    .headers
                    .get("x-final-url")
                    .cloned()
                    .unwrap_or_else(|| request.url.clone());
                Ok(response)
            }
            (FetchMode::Scripted, None) => {
                warn!(url = %request.url, "No render endpoint configured, fetching statically");
                self.get(&request.url, request).await
            }
            (FetchMode::Static, _) => self.get(&request.url, request).await,
        }
    }
}

/// Append `chunk` without growing `buf` past `limit`.
/// Returns false once the limit cut the chunk short.
fn push_capped(buf: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buf.len());
    if chunk.len() > room {
        buf.extend_from_slice(&chunk[..room]);
        false
    } else {
        buf.extend_from_slice(chunk);
        true
    }
}

/// Rendering service URL for a target page
pub fn render_url(endpoint: &str, target: &str, wait_ms: u64) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!(
        "{}{}url={}&wait={}",
        endpoint,
        separator,
        urlencoding::encode(target),
        wait_ms
    )
}

fn map_reqwest_error(request: &FetchRequest, err: &reqwest::Error) -> TransportError {
    let url = request.url.as_str();
    if err.is_timeout() {
        return TransportError::Timeout {
            url: url.to_string(),
            after: request.timeout,
        };
    }

    let message = error_chain(err);
    if err.is_connect() {
        let lower = message.to_lowercase();
        if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
            return TransportError::Dns {
                url: url.to_string(),
                message,
            };
        }
        return TransportError::Connect {
            url: url.to_string(),
            message,
        };
    }

    TransportError::Other {
        url: url.to_string(),
        message,
    }
}

/// Error message with its sources, since reqwest hides the useful part there
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_url_encodes_target() {
        let url = render_url("http://render:3000/render", "https://example.com/a?b=c&d=e", 1500);
        assert_eq!(
            url,
            "http://render:3000/render?url=https%3A%2F%2Fexample.com%2Fa%3Fb%3Dc%26d%3De&wait=1500"
        );
    }

    #[test]
    fn test_render_url_appends_to_existing_query() {
        let url = render_url("http://render/r?token=x", "https://example.com", 0);
        assert!(url.starts_with("http://render/r?token=x&url="));
    }

    #[test]
    fn test_body_stops_at_limit() {
        let mut buf = Vec::new();
        assert!(push_capped(&mut buf, b"<html><body>", 16));
        assert!(!push_capped(&mut buf, b"<p>long story</p>", 16));
        assert_eq!(buf, b"<html><body><p>l");
        assert!(!push_capped(&mut buf, b"more", 16));
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_body_under_limit_is_kept() {
        let mut buf = Vec::new();
        assert!(push_capped(&mut buf, b"abc", 3));
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn test_client_builds_with_defaults() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        assert!(!transport.can_render());
        assert_eq!(transport.name(), "http");
    }
}
