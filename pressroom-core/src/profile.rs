//! Site profile resolution and caching
//!
//! A [`SiteProfile`] is resolved lazily the first time a domain is seen and
//! shared as an `Arc` afterwards. The only field that changes after
//! resolution is the learned rendering mode, which concurrent writers
//! converge on.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::clock::{to_chrono, SharedClock};
use crate::fetch::{FetchMode, RenderingHint};
use crate::sites::{SiteRegistry, GENERIC_TEMPLATE_ID};

/// Template a profile maps to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    Known(String),
    Generic,
}

impl TemplateId {
    /// Registry id, `None` for generic
    pub fn known(&self) -> Option<&str> {
        match self {
            TemplateId::Known(id) => Some(id),
            TemplateId::Generic => None,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::Known(id) => f.write_str(id),
            TemplateId::Generic => f.write_str(GENERIC_TEMPLATE_ID),
        }
    }
}

/// Rendering mode learned from a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnedMode {
    pub mode: FetchMode,
    pub learned_at: DateTime<Utc>,
}

/// Cached per-host metadata guiding fetch and extraction
#[derive(Debug)]
pub struct SiteProfile {
    /// Normalized host: lowercase, no leading `www.`
    pub domain: String,
    pub template: TemplateId,
    /// Minimum delay between requests
    pub base_delay: Duration,
    /// Rendering requirement declared by the registry
    pub rendering: RenderingHint,
    pub accept_language: Option<String>,
    pub resolved_at: DateTime<Utc>,
    learned: RwLock<Option<LearnedMode>>,
}

impl SiteProfile {
    pub fn new(
        domain: impl Into<String>,
        template: TemplateId,
        base_delay: Duration,
        rendering: RenderingHint,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            domain: domain.into(),
            template,
            base_delay,
            rendering,
            accept_language: None,
            resolved_at,
            learned: RwLock::new(None),
        }
    }

    pub fn with_accept_language(mut self, accept_language: Option<String>) -> Self {
        self.accept_language = accept_language;
        self
    }

    pub fn is_known(&self) -> bool {
        matches!(self.template, TemplateId::Known(_))
    }

    /// Learned mode, if one exists and is younger than `ttl`
    pub fn learned_mode(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> Option<FetchMode> {
        let learned = (*self.learned.read())?;
        match ttl {
            Some(ttl) if now - learned.learned_at > to_chrono(ttl) => None,
            _ => Some(learned.mode),
        }
    }

    /// Remember a probed mode. Writers racing on the same probe outcome
    /// store the same value, so last-writer-wins is harmless.
    pub fn learn_mode(&self, mode: FetchMode, now: DateTime<Utc>) {
        *self.learned.write() = Some(LearnedMode {
            mode,
            learned_at: now,
        });
    }

    pub fn forget_mode(&self) {
        *self.learned.write() = None;
    }
}

/// Normalize a host name for use as a cache key
pub fn normalize_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => host,
    }
}

/// Resolves URLs to cached site profiles
#[derive(Debug)]
pub struct ProfileResolver {
    registry: Arc<SiteRegistry>,
    cache: DashMap<String, Arc<SiteProfile>>,
    ttl: Option<Duration>,
    clock: SharedClock,
}

impl ProfileResolver {
    pub fn new(registry: Arc<SiteRegistry>, clock: SharedClock) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
            ttl: None,
            clock,
        }
    }

    /// Expire cached profiles after `ttl`; `None` caches for the process lifetime
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    /// Profile for a URL's host. Never fails; URLs without a host resolve
    /// to a generic profile keyed by the empty domain.
    pub fn resolve(&self, url: &Url) -> Arc<SiteProfile> {
        self.resolve_domain(url.host_str().unwrap_or_default())
    }

    /// Profile for a host name
    pub fn resolve_domain(&self, host: &str) -> Arc<SiteProfile> {
        let domain = normalize_domain(host);
        let now = self.clock.now();

        if let Some(cached) = self.cache.get(&domain) {
            if self.is_fresh(&cached, now) {
                return Arc::clone(&cached);
            }
        }

        let profile = Arc::new(self.build(&domain, now));
        match self.cache.entry(domain) {
            Entry::Occupied(mut entry) => {
                if self.is_fresh(entry.get(), now) {
                    // Another task resolved it first
                    Arc::clone(entry.get())
                } else {
                    entry.insert(Arc::clone(&profile));
                    profile
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&profile));
                profile
            }
        }
    }

    /// Cached profile without resolving
    pub fn cached(&self, host: &str) -> Option<Arc<SiteProfile>> {
        self.cache
            .get(&normalize_domain(host))
            .map(|p| Arc::clone(&p))
    }

    /// Drop one cached profile
    pub fn invalidate(&self, host: &str) -> bool {
        self.cache.remove(&normalize_domain(host)).is_some()
    }

    /// Drop every cached profile
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn is_fresh(&self, profile: &SiteProfile, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - profile.resolved_at <= to_chrono(ttl),
            None => true,
        }
    }

    fn build(&self, domain: &str, now: DateTime<Utc>) -> SiteProfile {
        match self.registry.match_domain(domain) {
            Some(template) => {
                debug!(domain, template = %template.id, "Resolved known site profile");
                SiteProfile::new(
                    domain,
                    TemplateId::Known(template.id.clone()),
                    template.base_delay(),
                    template.rendering,
                    now,
                )
                .with_accept_language(template.accept_language.clone())
            }
            None => {
                debug!(domain, "Resolved generic site profile");
                SiteProfile::new(
                    domain,
                    TemplateId::Generic,
                    self.registry.generic_delay(),
                    RenderingHint::Unknown,
                    now,
                )
            }
        }
    }
}
