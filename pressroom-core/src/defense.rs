//! Defense signal detection
//!
//! Classifies a raw fetch attempt into a [`DefenseSignal`]. Classification is
//! pure: the same attempt always yields the same signal, and nothing here
//! touches scheduler state.
//!
//! Fingerprints are data ([`DefenseFingerprints`]) so they can be updated
//! without a rebuild. Precedence between signals is fixed in code:
//! `Blocked` > `ChallengePresented` > `RateLimited` > `Malformed` >
//! `CleanButEmpty` > `Clean`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::{read_file, ConfigError, DetectorConfig};
use crate::fetch::FetchAttemptResult;
use crate::text::visible_len;

const EMBEDDED_FINGERPRINTS: &str = include_str!("../sites/fingerprints.toml");

/// Category of defensive response, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefenseSignal {
    /// Usable page
    Clean,
    /// Well-formed 200 with almost no visible text
    CleanButEmpty,
    /// Wrong content type, truncated body or unexpected status
    Malformed,
    /// Server asked us to slow down
    RateLimited,
    /// CAPTCHA or interstitial challenge
    ChallengePresented,
    /// Bot wall, WAF block or geo restriction
    Blocked,
}

impl DefenseSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefenseSignal::Clean => "clean",
            DefenseSignal::CleanButEmpty => "clean_but_empty",
            DefenseSignal::Malformed => "malformed",
            DefenseSignal::RateLimited => "rate_limited",
            DefenseSignal::ChallengePresented => "challenge_presented",
            DefenseSignal::Blocked => "blocked",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, DefenseSignal::Clean)
    }

    /// Signals that count towards cooldown
    pub fn is_block(&self) -> bool {
        matches!(self, DefenseSignal::Blocked | DefenseSignal::ChallengePresented)
    }
}

impl fmt::Display for DefenseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual countermeasures a page shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefenseMeasure {
    Cloudflare,
    Captcha,
    JavascriptChallenge,
    BotDetection,
    RateLimitHeaders,
    RateLimitNotice,
    GeoBlocking,
}

/// Substring fingerprints for each countermeasure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseFingerprints {
    pub bot_wall: Vec<String>,
    pub challenge: Vec<String>,
    pub rate_limit_body: Vec<String>,
    pub rate_limit_headers: Vec<String>,
    pub geo_block: Vec<String>,
    /// Reported by probes only
    pub cloudflare: Vec<String>,
    /// Reported by probes only
    pub javascript_required: Vec<String>,
}

impl DefenseFingerprints {
    /// Load the fingerprint list shipped with the crate
    pub fn load_embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str("embedded fingerprints", EMBEDDED_FINGERPRINTS)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::from_toml_str(&path.display().to_string(), &content)
    }

    pub fn from_toml_str(origin: &str, content: &str) -> Result<Self, ConfigError> {
        let mut fingerprints: DefenseFingerprints =
            toml::from_str(content).map_err(|e| ConfigError::parse(origin, e))?;
        fingerprints.normalize();
        Ok(fingerprints)
    }

    /// Lowercase everything and drop blanks so matching can stay simple
    fn normalize(&mut self) {
        for list in [
            &mut self.bot_wall,
            &mut self.challenge,
            &mut self.rate_limit_body,
            &mut self.rate_limit_headers,
            &mut self.geo_block,
            &mut self.cloudflare,
            &mut self.javascript_required,
        ] {
            list.retain(|s| !s.trim().is_empty());
            for s in list.iter_mut() {
                *s = s.to_lowercase();
            }
        }
    }
}

fn any_in(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n.as_str()))
}

/// What a single scan of a response found
#[derive(Debug, Default, Clone, Copy)]
struct Matches {
    bot_wall: bool,
    challenge: bool,
    rate_limit_body: bool,
    rate_limit_headers: bool,
    geo_block: bool,
    cloudflare: bool,
    javascript_required: bool,
}

/// Everything the detector saw, for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseReport {
    pub signal: DefenseSignal,
    pub status: u16,
    pub measures: Vec<DefenseMeasure>,
    pub body_bytes: usize,
    pub visible_chars: usize,
}

/// Classifies fetch attempts into defense signals
#[derive(Debug, Clone)]
pub struct DefenseDetector {
    fingerprints: DefenseFingerprints,
    config: DetectorConfig,
}

impl DefenseDetector {
    pub fn new(fingerprints: DefenseFingerprints, config: DetectorConfig) -> Self {
        Self {
            fingerprints,
            config,
        }
    }

    /// Detector with the embedded fingerprints and default thresholds
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Ok(Self::new(
            DefenseFingerprints::load_embedded()?,
            DetectorConfig::default(),
        ))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify one attempt
    pub fn classify(&self, attempt: &FetchAttemptResult) -> DefenseSignal {
        let matches = self.scan(attempt);
        let visible = self.visible_chars(attempt);
        self.decide(attempt, &matches, visible)
    }

    /// Classify and list every countermeasure seen
    pub fn report(&self, attempt: &FetchAttemptResult) -> DefenseReport {
        let matches = self.scan(attempt);
        let visible = self.visible_chars(attempt);
        let signal = self.decide(attempt, &matches, visible);

        let mut measures = Vec::new();
        if matches.cloudflare || attempt.header("cf-ray").is_some() {
            measures.push(DefenseMeasure::Cloudflare);
        }
        if matches.challenge {
            measures.push(DefenseMeasure::Captcha);
        }
        if matches.javascript_required {
            measures.push(DefenseMeasure::JavascriptChallenge);
        }
        if matches.bot_wall {
            measures.push(DefenseMeasure::BotDetection);
        }
        if matches.rate_limit_headers {
            measures.push(DefenseMeasure::RateLimitHeaders);
        }
        if matches.rate_limit_body {
            measures.push(DefenseMeasure::RateLimitNotice);
        }
        if matches.geo_block || attempt.status == 451 {
            measures.push(DefenseMeasure::GeoBlocking);
        }

        DefenseReport {
            signal,
            status: attempt.status,
            measures,
            body_bytes: attempt.body.len(),
            visible_chars: visible,
        }
    }

    fn decide(&self, attempt: &FetchAttemptResult, m: &Matches, visible: usize) -> DefenseSignal {
        let status = attempt.status;
        let success = attempt.is_success();
        // Fingerprint phrases can show up in ordinary articles, so a full
        // 200 page needs an error status or a thin body before they count.
        let thin = visible < self.config.min_visible_chars;
        let suspicious = !success || thin;

        if status == 451 || ((m.bot_wall || m.geo_block) && suspicious) {
            return DefenseSignal::Blocked;
        }

        if m.challenge && suspicious {
            return DefenseSignal::ChallengePresented;
        }

        if status == 429
            || status == 503
            || (m.rate_limit_body && suspicious)
            || (m.rate_limit_headers && !success)
        {
            return DefenseSignal::RateLimited;
        }

        if !success
            || !attempt.is_html()
            || attempt.body.len() < self.config.min_body_bytes
        {
            return DefenseSignal::Malformed;
        }

        if thin {
            return DefenseSignal::CleanButEmpty;
        }

        DefenseSignal::Clean
    }

    fn scan(&self, attempt: &FetchAttemptResult) -> Matches {
        let fp = &self.fingerprints;
        let body = scan_window(&attempt.body, self.config.scan_limit_bytes).to_lowercase();

        Matches {
            bot_wall: any_in(&body, &fp.bot_wall),
            challenge: any_in(&body, &fp.challenge),
            rate_limit_body: any_in(&body, &fp.rate_limit_body),
            rate_limit_headers: attempt
                .headers
                .keys()
                .any(|name| fp.rate_limit_headers.iter().any(|h| h == name)),
            geo_block: any_in(&body, &fp.geo_block),
            cloudflare: any_in(&body, &fp.cloudflare),
            javascript_required: any_in(&body, &fp.javascript_required),
        }
    }

    fn visible_chars(&self, attempt: &FetchAttemptResult) -> usize {
        if attempt.body.is_empty() || !attempt.is_html() {
            return 0;
        }
        visible_len(&attempt.body)
    }
}

/// Prefix of at most `limit` bytes, cut on a char boundary
fn scan_window(body: &str, limit: usize) -> &str {
    if body.len() <= limit {
        return body;
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchMode;
    use std::collections::HashMap;
    use std::time::Duration;

    const ARTICLE_TEXT: &str = "City council members voted on Tuesday to approve the new transit budget, \
        which expands bus service to the northern suburbs and funds two new light rail stations. \
        Supporters said the plan would cut commute times for thousands of residents.";

    fn detector() -> DefenseDetector {
        DefenseDetector::with_defaults().unwrap()
    }

    fn attempt(status: u16, headers: &[(&str, &str)], body: &str) -> FetchAttemptResult {
        let mut map: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        map.entry("content-type".to_string())
            .or_insert_with(|| "text/html; charset=utf-8".to_string());
        FetchAttemptResult {
            url: "https://example.com/story".to_string(),
            final_url: "https://example.com/story".to_string(),
            mode: FetchMode::Static,
            status,
            headers: map,
            body: body.to_string(),
            elapsed: Duration::from_millis(50),
        }
    }

    fn page(inner: &str) -> String {
        format!(
            "<html><head><title>Page</title><meta name=\"description\" content=\"a page used for detector tests with enough padding to exceed the minimum body size\"></head><body>{inner}</body></html>"
        )
    }

    #[test]
    fn test_embedded_fingerprints_load() {
        let fp = DefenseFingerprints::load_embedded().unwrap();
        assert!(!fp.bot_wall.is_empty());
        assert!(!fp.challenge.is_empty());
        assert!(fp.rate_limit_headers.contains(&"retry-after".to_string()));
    }

    #[test]
    fn test_clean_article() {
        let a = attempt(200, &[], &page(&format!("<article><p>{ARTICLE_TEXT}</p></article>")));
        assert_eq!(detector().classify(&a), DefenseSignal::Clean);
    }

    #[test]
    fn test_http_429_is_rate_limited() {
        let a = attempt(429, &[("Retry-After", "30")], &page("<p>Too many requests</p>"));
        assert_eq!(detector().classify(&a), DefenseSignal::RateLimited);
    }

    #[test]
    fn test_503_without_fingerprint_is_rate_limited() {
        let a = attempt(503, &[], &page("<p>Service unavailable</p>"));
        assert_eq!(detector().classify(&a), DefenseSignal::RateLimited);
    }

    #[test]
    fn test_cloudflare_wall_is_blocked() {
        let body = page("<h1>Checking your browser before accessing example.com</h1><div class=\"cf-error-details\"></div>");
        let a = attempt(503, &[("cf-ray", "7d1")], &body);
        assert_eq!(detector().classify(&a), DefenseSignal::Blocked);
    }

    #[test]
    fn test_blocked_outranks_challenge() {
        let body = page("<p>Bot detected.</p><div class=\"g-recaptcha\"></div>");
        let a = attempt(403, &[], &body);
        assert_eq!(detector().classify(&a), DefenseSignal::Blocked);
    }

    #[test]
    fn test_challenge_page() {
        let body = page("<h2>Verify you are human</h2><div class=\"h-captcha\"></div>");
        let a = attempt(200, &[], &body);
        assert_eq!(detector().classify(&a), DefenseSignal::ChallengePresented);
    }

    #[test]
    fn test_fingerprint_matching_is_case_insensitive() {
        let body = page("<H2>PROVE YOU ARE HUMAN</H2>");
        let a = attempt(200, &[], &body);
        assert_eq!(detector().classify(&a), DefenseSignal::ChallengePresented);
    }

    #[test]
    fn test_article_mentioning_phrase_stays_clean() {
        let inner = format!(
            "<article><p>{ARTICLE_TEXT}</p><p>Police reported suspicious activity near the station.</p></article>"
        );
        let a = attempt(200, &[], &page(&inner));
        assert_eq!(detector().classify(&a), DefenseSignal::Clean);
    }

    #[test]
    fn test_geo_block_reported_as_blocked() {
        let a = attempt(200, &[], &page("<p>This video is not available in your country.</p>"));
        assert_eq!(detector().classify(&a), DefenseSignal::Blocked);
        let a = attempt(451, &[], &page("<p>Unavailable</p>"));
        assert_eq!(detector().classify(&a), DefenseSignal::Blocked);
    }

    #[test]
    fn test_bare_403_is_malformed() {
        let a = attempt(403, &[], &page("<p>Forbidden</p>"));
        assert_eq!(detector().classify(&a), DefenseSignal::Malformed);
    }

    #[test]
    fn test_non_html_is_malformed() {
        let a = attempt(200, &[("content-type", "application/pdf")], &"%PDF-1.7 ".repeat(100));
        assert_eq!(detector().classify(&a), DefenseSignal::Malformed);
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let a = attempt(200, &[], "<html><body>hi</body></html>");
        assert_eq!(detector().classify(&a), DefenseSignal::Malformed);
    }

    #[test]
    fn test_thin_page_is_clean_but_empty() {
        let inner = "<div id=\"root\"></div><p>Loading</p>\
            <script src=\"/static/js/main.3f9a1c.chunk.js\"></script>\
            <script src=\"/static/js/vendors.8d2e4b.chunk.js\"></script>";
        let a = attempt(200, &[], &page(inner));
        assert_eq!(detector().classify(&a), DefenseSignal::CleanButEmpty);
    }

    #[test]
    fn test_rate_limit_headers_only_count_on_errors() {
        let inner = format!("<article><p>{ARTICLE_TEXT}</p></article>");
        let ok = attempt(200, &[("x-ratelimit-remaining", "10")], &page(&inner));
        assert_eq!(detector().classify(&ok), DefenseSignal::Clean);

        let err = attempt(400, &[("x-ratelimit-remaining", "0")], &page(&inner));
        assert_eq!(detector().classify(&err), DefenseSignal::RateLimited);
    }

    #[test]
    fn test_fingerprint_past_scan_limit_is_ignored() {
        let config = DetectorConfig {
            scan_limit_bytes: 512,
            ..DetectorConfig::default()
        };
        let detector = DefenseDetector::new(DefenseFingerprints::load_embedded().unwrap(), config);
        let padding = "x".repeat(1024);
        let a = attempt(403, &[], &page(&format!("<p>{padding}</p><p>bot detected</p>")));
        assert_eq!(detector.classify(&a), DefenseSignal::Malformed);
    }

    #[test]
    fn test_report_lists_measures() {
        let body = page("<p>Please enable JavaScript</p><div class=\"g-recaptcha\"></div>");
        let a = attempt(200, &[("cf-ray", "abc")], &body);
        let report = detector().report(&a);
        assert_eq!(report.signal, DefenseSignal::ChallengePresented);
        assert!(report.measures.contains(&DefenseMeasure::Cloudflare));
        assert!(report.measures.contains(&DefenseMeasure::Captcha));
        assert!(report.measures.contains(&DefenseMeasure::JavascriptChallenge));
    }

    #[test]
    fn test_signal_severity_order() {
        assert!(DefenseSignal::Blocked > DefenseSignal::ChallengePresented);
        assert!(DefenseSignal::ChallengePresented > DefenseSignal::RateLimited);
        assert!(DefenseSignal::RateLimited > DefenseSignal::Malformed);
        assert!(DefenseSignal::Malformed > DefenseSignal::CleanButEmpty);
        assert!(DefenseSignal::CleanButEmpty > DefenseSignal::Clean);
        assert!(DefenseSignal::Blocked.is_block());
        assert!(!DefenseSignal::RateLimited.is_block());
    }
}
