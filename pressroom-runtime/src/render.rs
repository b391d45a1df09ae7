//! Rendering mode selection
//!
//! Decides between a plain HTTP fetch and a scripted (rendered) one:
//! - An explicit profile hint always wins
//! - Otherwise a fresh learned mode on the profile is reused
//! - Otherwise a static probe is inspected for a client-rendered shell,
//!   and the answer is remembered on the profile

use pressroom_core::text::{normalize_whitespace, visible_text};
use pressroom_core::{FetchMode, RuntimeConfig, SharedClock, SiteProfile};
use scraper::{Html, Selector};
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// Root markers left in the markup by client-side frameworks
const FRAMEWORK_MARKERS: &[(&str, &str)] = &[
    ("id=\"root\"", "react"),
    ("id='root'", "react"),
    ("data-reactroot", "react"),
    ("id=\"__next\"", "nextjs"),
    ("__next_data__", "nextjs"),
    ("id=\"app\"", "vue"),
    ("data-server-rendered", "vue"),
    ("__nuxt__", "nuxt"),
    ("ng-app", "angular"),
    ("ng-version", "angular"),
    ("svelte-", "svelte"),
];

/// Phrases a `<noscript>` block uses to ask for JavaScript
const NOSCRIPT_PHRASES: &[&str] = &[
    "enable javascript",
    "javascript is required",
    "requires javascript",
    "javascript is disabled",
    "turn on javascript",
];

static NOSCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("noscript").unwrap());

/// What a static probe revealed about a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Visible characters outside script/style
    pub visible_chars: usize,
    /// Framework markers found, in marker order
    pub markers: Vec<&'static str>,
    /// Frameworks the markers point at, deduplicated
    pub frameworks: Vec<&'static str>,
    /// A `<noscript>` block asks the reader to enable JavaScript
    pub noscript_notice: bool,
    /// The page is an empty shell waiting for client-side rendering
    pub client_shell: bool,
}

impl ProbeResult {
    /// Mode this probe argues for
    pub fn suggested_mode(&self) -> FetchMode {
        if self.client_shell {
            FetchMode::Scripted
        } else {
            FetchMode::Static
        }
    }
}

/// Inspect statically fetched markup for a client-rendered shell.
///
/// A shell has near-empty visible text together with a framework root
/// marker or a noscript notice. Markers alone do not count: plenty of
/// server-rendered pages hydrate into a `#root`.
pub fn detect_client_shell(html: &str, text_threshold: usize) -> ProbeResult {
    let document = Html::parse_document(html);
    let visible_chars = visible_text(&document).chars().count();
    let lower = html.to_lowercase();

    let markers: Vec<&'static str> = FRAMEWORK_MARKERS
        .iter()
        .filter(|(marker, _)| lower.contains(marker))
        .map(|(marker, _)| *marker)
        .collect();

    let mut frameworks: Vec<&'static str> = Vec::new();
    for (marker, framework) in FRAMEWORK_MARKERS {
        if markers.contains(marker) && !frameworks.contains(framework) {
            frameworks.push(*framework);
        }
    }

    // Raw text: noscript content counts as invisible everywhere else
    let noscript_notice = document.select(&NOSCRIPT_SELECTOR).any(|el| {
        let text = normalize_whitespace(&el.text().collect::<String>()).to_lowercase();
        NOSCRIPT_PHRASES.iter().any(|p| text.contains(p))
    });

    let thin = visible_chars < text_threshold;
    let client_shell = thin && (!markers.is_empty() || noscript_notice);

    ProbeResult {
        visible_chars,
        markers,
        frameworks,
        noscript_notice,
        client_shell,
    }
}

/// Picks the fetch mode for a profile
#[derive(Debug, Clone)]
pub struct RenderingSelector {
    clock: SharedClock,
    hint_ttl: Option<Duration>,
    text_threshold: usize,
}

impl RenderingSelector {
    pub fn new(clock: SharedClock, config: &RuntimeConfig) -> Self {
        Self {
            clock,
            hint_ttl: config.render_hint_ttl(),
            text_threshold: config.shell_text_threshold,
        }
    }

    /// Mode known without probing: the profile hint, then a fresh learned mode
    pub fn preselect(&self, profile: &SiteProfile) -> Option<FetchMode> {
        profile
            .rendering
            .fixed_mode()
            .or_else(|| profile.learned_mode(self.clock.now(), self.hint_ttl))
    }

    /// Run shell detection with the configured threshold
    pub fn probe(&self, html: &str) -> ProbeResult {
        detect_client_shell(html, self.text_threshold)
    }

    /// Choose a mode. A probe's answer is remembered on the profile; with
    /// neither a known mode nor a probe the page is fetched statically.
    pub fn select_mode(&self, profile: &SiteProfile, probe: Option<&ProbeResult>) -> FetchMode {
        if let Some(mode) = self.preselect(profile) {
            return mode;
        }

        match probe {
            Some(probe) => {
                let mode = probe.suggested_mode();
                profile.learn_mode(mode, self.clock.now());
                debug!(
                    domain = %profile.domain,
                    mode = %mode,
                    visible_chars = probe.visible_chars,
                    markers = ?probe.markers,
                    "Learned rendering mode"
                );
                mode
            }
            None => FetchMode::Static,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pressroom_core::{Clock, ManualClock, RenderingHint, TemplateId};
    use std::sync::Arc;

    const REACT_SHELL: &str = r#"<!DOCTYPE html><html><head><title>App</title>
        <script src="/static/js/main.js"></script></head>
        <body><div id="root"></div></body></html>"#;

    const NOSCRIPT_SHELL: &str = r#"<html><body>
        <noscript>You need to enable JavaScript to run this app.</noscript>
        <div class="mount"></div></body></html>"#;

    const SERVER_RENDERED: &str = r#"<html><body><div id="root">
        <h1>Harbour reopens after storm repairs</h1>
        <p>The harbour reopened to commercial traffic on Monday after six weeks of repairs to the storm-damaged breakwater.</p>
        <p>Port officials said the first container ship docked shortly after dawn, ending a backlog that had stretched for weeks.</p>
        </div></body></html>"#;

    fn profile(rendering: RenderingHint) -> SiteProfile {
        SiteProfile::new(
            "example.org",
            TemplateId::Generic,
            Duration::from_secs(5),
            rendering,
            Utc::now(),
        )
    }

    fn selector(clock: &ManualClock) -> RenderingSelector {
        RenderingSelector::new(Arc::new(clock.clone()), &RuntimeConfig::default())
    }

    #[test]
    fn test_react_shell_detected() {
        let probe = detect_client_shell(REACT_SHELL, 200);
        assert!(probe.client_shell);
        assert_eq!(probe.frameworks, vec!["react"]);
        assert_eq!(probe.suggested_mode(), FetchMode::Scripted);
    }

    #[test]
    fn test_noscript_notice_detected() {
        let probe = detect_client_shell(NOSCRIPT_SHELL, 200);
        assert!(probe.noscript_notice);
        assert!(probe.client_shell);
    }

    #[test]
    fn test_noscript_notice_alone_selects_scripted() {
        let html = r#"<html><body><noscript>
            This site requires JavaScript.   Please
            enable   JavaScript in your browser.</noscript></body></html>"#;
        let probe = detect_client_shell(html, 200);
        assert!(probe.markers.is_empty());
        assert!(probe.noscript_notice);
        assert_eq!(probe.suggested_mode(), FetchMode::Scripted);
    }

    #[test]
    fn test_noscript_notice_on_full_page_is_static() {
        let html = format!(
            "<html><body><noscript>Please enable JavaScript.</noscript>{}</body></html>",
            SERVER_RENDERED
        );
        let probe = detect_client_shell(&html, 200);
        assert!(probe.noscript_notice);
        assert!(!probe.client_shell);
    }

    #[test]
    fn test_server_rendered_root_is_static() {
        let probe = detect_client_shell(SERVER_RENDERED, 200);
        assert!(!probe.markers.is_empty());
        assert!(!probe.client_shell);
        assert_eq!(probe.suggested_mode(), FetchMode::Static);
    }

    #[test]
    fn test_hint_wins_over_probe() {
        let clock = ManualClock::default();
        let selector = selector(&clock);
        let probe = selector.probe(REACT_SHELL);

        let profile = profile(RenderingHint::Static);
        assert_eq!(selector.select_mode(&profile, Some(&probe)), FetchMode::Static);
        assert_eq!(profile.learned_mode(clock.now(), None), None);
    }

    #[test]
    fn test_probe_result_is_learned() {
        let clock = ManualClock::default();
        let selector = selector(&clock);
        let profile = profile(RenderingHint::Unknown);

        assert_eq!(selector.preselect(&profile), None);
        let probe = selector.probe(REACT_SHELL);
        assert_eq!(selector.select_mode(&profile, Some(&probe)), FetchMode::Scripted);
        assert_eq!(selector.preselect(&profile), Some(FetchMode::Scripted));
    }

    #[test]
    fn test_learned_mode_expires() {
        let clock = ManualClock::default();
        let selector = selector(&clock);
        let profile = profile(RenderingHint::Unknown);

        let probe = selector.probe(REACT_SHELL);
        selector.select_mode(&profile, Some(&probe));
        clock.advance(Duration::from_secs(7 * 60 * 60));
        assert_eq!(selector.preselect(&profile), None);
    }

    #[test]
    fn test_no_probe_defaults_to_static() {
        let clock = ManualClock::default();
        let profile = profile(RenderingHint::Unknown);
        assert_eq!(selector(&clock).select_mode(&profile, None), FetchMode::Static);
        assert_eq!(profile.learned_mode(clock.now(), None), None);
    }
}
