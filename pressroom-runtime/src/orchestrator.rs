//! Fetch Orchestrator
//!
//! Drives one URL through the pipeline:
//! `Pending -> ProfileResolved -> BackoffChecked -> Fetching -> Classified
//! -> Extracting -> {Completed | Rejected | Deferred}`
//!
//! - A global semaphore bounds in-flight URLs
//! - A per-domain lock keeps one fetch per domain in flight
//! - The only suspension points are the lock waits and the transport call
//! - Backoff state is updated before extraction runs

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pressroom_core::{
    BackoffScheduler, DefenseDetector, DefenseFingerprints, DefenseSignal, DomainStats,
    EngineConfig, ExtractedArticle, ExtractionOutcome, FetchAttemptResult, FetchMode, Gate,
    ProfileResolver, SharedClock, SiteProfile, SiteRegistry, SystemClock,
};
use pressroom_extract::ExtractionChain;
use pressroom_net::{
    BrowserHeaders, FetchRequest, HttpTransport, Transport, TransportError, TransportErrorKind,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::render::RenderingSelector;

/// Errors building an orchestrator
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] pressroom_core::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Why a URL was not attempted now
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deferral {
    /// Domain is backing off; retry at `retry_at`
    Backoff {
        retry_at: DateTime<Utc>,
        signal: Option<DefenseSignal>,
    },
    /// Domain is cooling down; `until` is `None` until an operator reset
    Cooldown { until: Option<DateTime<Utc>> },
    /// The transport failed before a response arrived
    Transport {
        error: TransportErrorKind,
        message: String,
        retry_at: DateTime<Utc>,
    },
}

impl Deferral {
    /// Earliest time a retry makes sense, if any
    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Deferral::Backoff { retry_at, .. } | Deferral::Transport { retry_at, .. } => {
                Some(*retry_at)
            }
            Deferral::Cooldown { until } => *until,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Deferral::Backoff { .. } => "backoff",
            Deferral::Cooldown { .. } => "cooldown",
            Deferral::Transport { .. } => "transport",
        }
    }
}

/// Why a URL was given up on
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Site answered with a block or challenge
    DefenseBlock {
        signal: DefenseSignal,
        consecutive_failures: u32,
        /// The domain is now in cooldown
        cooldown: bool,
    },
    /// No strategy produced a publishable article
    ExtractionFailure {
        reason: String,
        confidence: Option<f64>,
    },
    InvalidUrl { url: String, reason: String },
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::DefenseBlock { .. } => "defense_block",
            RejectReason::ExtractionFailure { .. } => "extraction_failure",
            RejectReason::InvalidUrl { .. } => "invalid_url",
        }
    }
}

/// Result of processing one URL
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed(ExtractedArticle),
    Deferred(Deferral),
    Rejected(RejectReason),
    Cancelled,
}

impl ProcessOutcome {
    pub fn article(&self) -> Option<&ExtractedArticle> {
        match self {
            ProcessOutcome::Completed(article) => Some(article),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProcessOutcome::Completed(_))
    }

    /// Short label for reports, e.g. `rejected:defense_block`
    pub fn label(&self) -> String {
        match self {
            ProcessOutcome::Completed(_) => "completed".to_string(),
            ProcessOutcome::Deferred(d) => format!("deferred:{}", d.label()),
            ProcessOutcome::Rejected(r) => format!("rejected:{}", r.label()),
            ProcessOutcome::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Fetch attempt that produced no response
enum AttemptError {
    Cancelled,
    Transport(TransportError),
}

/// The fetch-and-extract engine
pub struct Orchestrator {
    config: EngineConfig,
    clock: SharedClock,
    resolver: ProfileResolver,
    scheduler: BackoffScheduler,
    detector: DefenseDetector,
    selector: RenderingSelector,
    chain: ExtractionChain,
    transport: Arc<dyn Transport>,
    permits: Semaphore,
    domain_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("transport", &self.transport.name())
            .field("profiles", &self.resolver.len())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator on the wall clock
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self, RuntimeError> {
        Self::with_clock(config, transport, SystemClock::shared())
    }

    /// Create an orchestrator over the reqwest transport
    pub fn with_http(config: EngineConfig) -> Result<Self, RuntimeError> {
        let transport = HttpTransport::new(config.transport.clone())?;
        Self::new(config, Arc::new(transport))
    }

    /// Create an orchestrator with an injected clock
    pub fn with_clock(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        clock: SharedClock,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let registry = match &config.sites_path {
            Some(path) => SiteRegistry::load_from_path(path)?,
            None => SiteRegistry::load_embedded()?,
        };
        let fingerprints = match &config.fingerprints_path {
            Some(path) => DefenseFingerprints::load_from_path(path)?,
            None => DefenseFingerprints::load_embedded()?,
        };
        let registry = Arc::new(registry);

        info!(
            templates = registry.len(),
            transport = transport.name(),
            max_concurrent = config.runtime.max_concurrent,
            "Orchestrator ready"
        );

        Ok(Self {
            resolver: ProfileResolver::new(Arc::clone(&registry), Arc::clone(&clock))
                .with_ttl(config.runtime.profile_ttl()),
            scheduler: BackoffScheduler::new(config.scheduler.clone(), Arc::clone(&clock)),
            detector: DefenseDetector::new(fingerprints, config.detector.clone()),
            selector: RenderingSelector::new(Arc::clone(&clock), &config.runtime),
            chain: ExtractionChain::new(registry, config.extraction.clone()),
            permits: Semaphore::new(config.runtime.max_concurrent),
            domain_locks: DashMap::new(),
            transport,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn registry(&self) -> &SiteRegistry {
        self.resolver.registry()
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.resolver
    }

    pub fn detector(&self) -> &DefenseDetector {
        &self.detector
    }

    pub fn selector(&self) -> &RenderingSelector {
        &self.selector
    }

    /// Process one URL to completion, deferral or rejection
    pub async fn process_url(&self, url: &str) -> ProcessOutcome {
        self.process_url_cancellable(url, &CancellationToken::new()).await
    }

    /// Like [`Orchestrator::process_url`], abandoning the attempt when
    /// `cancel` fires. A cancelled attempt leaves backoff state untouched.
    pub async fn process_url_cancellable(&self, url: &str, cancel: &CancellationToken) -> ProcessOutcome {
        debug!(url, state = "pending", "Processing URL");
        if cancel.is_cancelled() {
            return ProcessOutcome::Cancelled;
        }

        let parsed = match parse_target(url) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!("Rejecting {}: {}", url, reason);
                return ProcessOutcome::Rejected(RejectReason::InvalidUrl {
                    url: url.to_string(),
                    reason,
                });
            }
        };

        let profile = self.resolver.resolve(&parsed);
        debug!(url, domain = %profile.domain, template = %profile.template, state = "profile_resolved");

        if let Some(deferral) = self.check_gate(&profile) {
            debug!(url, state = "deferred", reason = deferral.label());
            return ProcessOutcome::Deferred(deferral);
        }

        let outcome = self.process_locked(url, &parsed, &profile, cancel).await;
        self.prune_domain_lock(&profile.domain);
        outcome
    }

    /// Everything from the domain lock onwards. The lock is taken before a
    /// global permit so URLs queued behind a busy domain hold no permit.
    async fn process_locked(
        &self,
        url: &str,
        parsed: &Url,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        let lock = self.domain_lock(&profile.domain);
        let _guard = tokio::select! {
            _ = cancel.cancelled() => return ProcessOutcome::Cancelled,
            guard = lock.lock() => guard,
        };

        // Another task may have recorded against this domain while we waited
        if let Some(deferral) = self.check_gate(profile) {
            debug!(url, state = "deferred", reason = deferral.label());
            return ProcessOutcome::Deferred(deferral);
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return ProcessOutcome::Cancelled,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return ProcessOutcome::Cancelled,
            },
        };
        debug!(url, state = "backoff_checked");

        let attempt = match self.fetch(parsed, profile, cancel).await {
            Ok(attempt) => attempt,
            Err(AttemptError::Cancelled) => {
                debug!(url, state = "cancelled");
                return ProcessOutcome::Cancelled;
            }
            Err(AttemptError::Transport(err)) => return self.transport_failure(profile, err),
        };

        let signal = self.detector.classify(&attempt);
        debug!(url, status = attempt.status, signal = %signal, mode = %attempt.mode, state = "classified");

        let update = self
            .scheduler
            .record(&profile.domain, signal, profile.base_delay, attempt.retry_after());

        if signal.is_block() && update.in_cooldown {
            warn!(
                url,
                signal = %signal,
                failures = update.consecutive_failures,
                "Defense block, domain in cooldown"
            );
            return ProcessOutcome::Rejected(RejectReason::DefenseBlock {
                signal,
                consecutive_failures: update.consecutive_failures,
                cooldown: update.in_cooldown,
            });
        }

        if !signal.is_clean() {
            if signal.is_block() {
                warn!(
                    url,
                    signal = %signal,
                    failures = update.consecutive_failures,
                    retry_at = %update.next_eligible,
                    "Defense block, backing off"
                );
            } else {
                debug!(url, state = "deferred", signal = %signal, retry_at = %update.next_eligible);
            }
            return ProcessOutcome::Deferred(Deferral::Backoff {
                retry_at: update.next_eligible,
                signal: Some(signal),
            });
        }

        debug!(url, state = "extracting");
        self.extract(&attempt, profile)
    }

    /// Current backoff snapshot for a domain
    pub fn domain_stats(&self, domain: &str) -> Option<DomainStats> {
        self.scheduler.stats(domain)
    }

    /// Snapshot of every domain seen so far
    pub fn all_domain_stats(&self) -> Vec<DomainStats> {
        self.scheduler.all_stats()
    }

    /// Operator reset of a domain's backoff and cooldown
    pub fn reset_domain(&self, domain: &str) -> bool {
        self.scheduler.reset(domain)
    }

    fn check_gate(&self, profile: &SiteProfile) -> Option<Deferral> {
        match self.scheduler.gate(&profile.domain) {
            Gate::Allowed => None,
            Gate::WaitUntil(retry_at) => Some(Deferral::Backoff {
                retry_at,
                signal: self
                    .scheduler
                    .stats(&profile.domain)
                    .and_then(|s| s.last_signal),
            }),
            Gate::Cooldown { until } => Some(Deferral::Cooldown { until }),
        }
    }

    /// Drop the lock entry for a domain nobody is waiting on
    fn prune_domain_lock(&self, domain: &str) {
        self.domain_locks
            .remove_if(domain, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.domain_locks
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Choose a mode and fetch. When the mode is unknown, a static probe is
    /// fetched first; it doubles as the real attempt unless the page turns
    /// out to be a client-rendered shell.
    async fn fetch(
        &self,
        url: &Url,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<FetchAttemptResult, AttemptError> {
        if let Some(mode) = self.selector.preselect(profile) {
            debug!(url = %url, mode = %mode, state = "fetching");
            return self.attempt(url, mode, profile, cancel).await;
        }

        debug!(url = %url, mode = "probe", state = "fetching");
        let probe_attempt = self.attempt(url, FetchMode::Static, profile, cancel).await?;

        // Only a usable page says anything about rendering
        let signal = self.detector.classify(&probe_attempt);
        if !matches!(signal, DefenseSignal::Clean | DefenseSignal::CleanButEmpty) {
            return Ok(probe_attempt);
        }

        let probe = self.selector.probe(&probe_attempt.body);
        match self.selector.select_mode(profile, Some(&probe)) {
            FetchMode::Static => Ok(probe_attempt),
            FetchMode::Scripted => {
                info!(url = %url, frameworks = ?probe.frameworks, "Client-rendered page, fetching scripted");
                self.attempt(url, FetchMode::Scripted, profile, cancel).await
            }
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        mode: FetchMode,
        profile: &SiteProfile,
        cancel: &CancellationToken,
    ) -> Result<FetchAttemptResult, AttemptError> {
        let headers = BrowserHeaders::new()
            .with_user_agent(self.config.transport.user_agent.as_deref())
            .with_accept_language(profile.accept_language.as_deref())
            .build(url);
        let request = FetchRequest::new(url.as_str(), mode, self.config.transport.timeout())
            .with_headers(headers);

        let limit = self.config.runtime.attempt_timeout();
        tokio::select! {
            _ = cancel.cancelled() => Err(AttemptError::Cancelled),
            result = tokio::time::timeout(limit, self.transport.fetch(&request)) => match result {
                Ok(Ok(response)) => Ok(response.into_attempt(&request)),
                Ok(Err(err)) => Err(AttemptError::Transport(err)),
                Err(_) => Err(AttemptError::Transport(TransportError::Timeout {
                    url: request.url.clone(),
                    after: limit,
                })),
            },
        }
    }

    fn transport_failure(&self, profile: &SiteProfile, err: TransportError) -> ProcessOutcome {
        let signal = err.signal();
        warn!("Failed to fetch {}: {}", profile.domain, err);
        let update = self
            .scheduler
            .record(&profile.domain, signal, profile.base_delay, None);
        ProcessOutcome::Deferred(Deferral::Transport {
            error: err.kind(),
            message: err.to_string(),
            retry_at: update.next_eligible,
        })
    }

    fn extract(&self, attempt: &FetchAttemptResult, profile: &SiteProfile) -> ProcessOutcome {
        let threshold = self.config.extraction.publish_threshold;

        match self.chain.extract(&attempt.body, &attempt.final_url, profile) {
            ExtractionOutcome::Success(article) => {
                info!(
                    url = %article.url,
                    strategy = %article.strategy,
                    confidence = article.confidence,
                    words = article.word_count,
                    "Extracted article"
                );
                ProcessOutcome::Completed(article)
            }
            ExtractionOutcome::LowConfidence(article, confidence) if confidence >= threshold => {
                info!(
                    url = %article.url,
                    strategy = %article.strategy,
                    confidence,
                    "Extracted article with low confidence"
                );
                ProcessOutcome::Completed(article)
            }
            ExtractionOutcome::LowConfidence(article, confidence) => {
                warn!(
                    url = %article.url,
                    strategy = %article.strategy,
                    confidence,
                    threshold,
                    "Extraction below publish threshold"
                );
                ProcessOutcome::Rejected(RejectReason::ExtractionFailure {
                    reason: format!(
                        "{} confidence {:.2} below threshold {:.2}",
                        article.strategy, confidence, threshold
                    ),
                    confidence: Some(confidence),
                })
            }
            ExtractionOutcome::Failed(reason) => {
                warn!("Extraction failed for {}: {}", attempt.final_url, reason);
                ProcessOutcome::Rejected(RejectReason::ExtractionFailure {
                    reason,
                    confidence: None,
                })
            }
        }
    }
}

/// Parse a URL the engine can fetch: http(s) with a host
fn parse_target(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url.trim()).map_err(|e| e.to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(parsed)
}
