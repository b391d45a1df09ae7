//! Browser-like request headers
//!
//! Requests carry the header set a real browser sends on a top-level
//! navigation, with the user agent rotated per request.

use rand::Rng;
use url::Url;

/// User agents for rotation
pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 Edg/135.0.0.0",
];

/// Referer used when the caller has none
pub const DEFAULT_REFERER: &str = "https://www.google.com/";

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    let idx = rand::thread_rng().gen_range(0..BROWSER_USER_AGENTS.len());
    BROWSER_USER_AGENTS[idx]
}

/// Builder for a navigation header set
#[derive(Debug, Clone, Default)]
pub struct BrowserHeaders {
    user_agent: Option<String>,
    accept_language: Option<String>,
    referer: Option<String>,
}

impl BrowserHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the user agent instead of rotating
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn with_accept_language(mut self, accept_language: Option<&str>) -> Self {
        self.accept_language = accept_language.map(str::to_string);
        self
    }

    pub fn with_referer(mut self, referer: Option<&str>) -> Self {
        self.referer = referer.map(str::to_string);
        self
    }

    /// Headers for a navigation to `url`
    pub fn build(&self, url: &Url) -> Vec<(String, String)> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| random_user_agent().to_string());
        let accept_language = self
            .accept_language
            .clone()
            .unwrap_or_else(|| default_accept_language(url).to_string());
        let referer = self
            .referer
            .clone()
            .unwrap_or_else(|| DEFAULT_REFERER.to_string());
        let fetch_site = if same_site(url, &referer) {
            "same-origin"
        } else {
            "cross-site"
        };

        vec![
            ("User-Agent".to_string(), user_agent),
            ("Accept".to_string(), ACCEPT_HTML.to_string()),
            ("Accept-Language".to_string(), accept_language),
            ("Referer".to_string(), referer),
            ("DNT".to_string(), "1".to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
            ("Sec-Fetch-Dest".to_string(), "document".to_string()),
            ("Sec-Fetch-Mode".to_string(), "navigate".to_string()),
            ("Sec-Fetch-Site".to_string(), fetch_site.to_string()),
            ("Sec-Fetch-User".to_string(), "?1".to_string()),
        ]
    }
}

/// Rotating browser headers for `url`
pub fn browser_headers(url: &Url, referer: Option<&str>) -> Vec<(String, String)> {
    BrowserHeaders::new().with_referer(referer).build(url)
}

/// British English for .uk hosts, US English elsewhere
fn default_accept_language(url: &Url) -> &'static str {
    match url.host_str() {
        Some(host) if host.ends_with(".uk") => "en-GB,en;q=0.9",
        _ => "en-US,en;q=0.9",
    }
}

fn same_site(url: &Url, referer: &str) -> bool {
    match (url.host_str(), Url::parse(referer).ok()) {
        (Some(host), Some(referer)) => referer.host_str() == Some(host),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_random_user_agent() {
        let ua = random_user_agent();
        assert!(ua.contains("Mozilla"));
    }

    #[test]
    fn test_default_headers() {
        let url = Url::parse("https://example.com/story").unwrap();
        let headers = browser_headers(&url, None);
        assert_eq!(get(&headers, "referer"), Some(DEFAULT_REFERER));
        assert_eq!(get(&headers, "sec-fetch-site"), Some("cross-site"));
        assert_eq!(get(&headers, "accept-language"), Some("en-US,en;q=0.9"));
        assert!(BROWSER_USER_AGENTS.contains(&get(&headers, "user-agent").unwrap()));
    }

    #[test]
    fn test_uk_hosts_prefer_british_english() {
        let url = Url::parse("https://www.bbc.co.uk/news").unwrap();
        let headers = browser_headers(&url, None);
        assert_eq!(get(&headers, "accept-language"), Some("en-GB,en;q=0.9"));
    }

    #[test]
    fn test_same_site_referer() {
        let url = Url::parse("https://example.com/b").unwrap();
        let headers = browser_headers(&url, Some("https://example.com/a"));
        assert_eq!(get(&headers, "sec-fetch-site"), Some("same-origin"));
    }

    #[test]
    fn test_pinned_user_agent_and_language() {
        let url = Url::parse("https://example.com/").unwrap();
        let headers = BrowserHeaders::new()
            .with_user_agent(Some("pressroom-test/1.0"))
            .with_accept_language(Some("de-DE"))
            .build(&url);
        assert_eq!(get(&headers, "user-agent"), Some("pressroom-test/1.0"));
        assert_eq!(get(&headers, "accept-language"), Some("de-DE"));
    }
}
