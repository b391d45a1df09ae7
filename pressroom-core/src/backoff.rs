//! Per-domain backoff scheduling
//!
//! Each domain owns a [`DomainBackoffState`] behind its own mutex, so
//! updates for one domain are linearized while different domains proceed in
//! parallel. State only changes through [`BackoffScheduler::record`] and
//! [`BackoffScheduler::reset`]; [`BackoffScheduler::gate`] is read-only.
//!
//! Transitions:
//! - `Clean`: failures reset, next attempt after the base delay
//! - any other signal: failures += 1, delay doubles per failure (capped, jittered)
//! - `Blocked` / `ChallengePresented`: past the threshold the domain enters cooldown

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{to_chrono, SharedClock};
use crate::config::BackoffConfig;
use crate::defense::DefenseSignal;
use crate::profile::normalize_domain;

/// Cooldown marker. Without an `until` it lasts until an operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

impl Cooldown {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.until.map_or(true, |until| now < until)
    }
}

/// Answer to "may I fetch this domain now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Allowed,
    WaitUntil(DateTime<Utc>),
    /// Domain is unavailable; `until` is `None` for an indefinite cooldown
    Cooldown { until: Option<DateTime<Utc>> },
}

/// Backoff state for one domain
#[derive(Debug, Clone)]
pub struct DomainBackoffState {
    pub consecutive_failures: u32,
    pub last_signal: Option<DefenseSignal>,
    pub next_eligible: DateTime<Utc>,
    pub current_delay: Duration,
    pub cooldown: Option<Cooldown>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

impl DomainBackoffState {
    fn new(base_delay: Duration, now: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            last_signal: None,
            next_eligible: now,
            current_delay: base_delay,
            cooldown: None,
            total_attempts: 0,
            total_successes: 0,
            total_failures: 0,
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown.is_some_and(|c| c.is_active(now))
    }
}

/// What one `record` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffUpdate {
    pub signal: DefenseSignal,
    pub consecutive_failures: u32,
    pub delay: Duration,
    pub next_eligible: DateTime<Utc>,
    /// This call pushed the domain into cooldown
    pub entered_cooldown: bool,
    /// The domain is in cooldown after this call
    pub in_cooldown: bool,
}

/// Read-only snapshot for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStats {
    pub domain: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub current_delay_ms: u64,
    pub next_eligible: DateTime<Utc>,
    pub in_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_signal: Option<DefenseSignal>,
}

impl DomainStats {
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }

    /// Successes over attempts, 0 when nothing was attempted
    pub fn success_ratio(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Largest jitter ratio the scheduler applies
const MAX_JITTER: f64 = 0.95;

/// Owns backoff state for every domain
#[derive(Debug)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    clock: SharedClock,
    states: DashMap<String, Arc<Mutex<DomainBackoffState>>>,
}

impl BackoffScheduler {
    /// Create a scheduler. A jitter ratio outside `[0, 1)` is clamped.
    pub fn new(mut config: BackoffConfig, clock: SharedClock) -> Self {
        if !(0.0..1.0).contains(&config.jitter) {
            let clamped = if config.jitter.is_nan() {
                0.0
            } else {
                config.jitter.clamp(0.0, MAX_JITTER)
            };
            warn!("Jitter {} out of range, using {}", config.jitter, clamped);
            config.jitter = clamped;
        }
        Self {
            config,
            clock,
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Whether a fetch may start now. Never mutates state.
    pub fn gate(&self, domain: &str) -> Gate {
        let Some(state) = self.state(domain) else {
            return Gate::Allowed;
        };
        let state = state.lock();
        let now = self.clock.now();

        if let Some(cooldown) = state.cooldown.filter(|c| c.is_active(now)) {
            return Gate::Cooldown {
                until: cooldown.until,
            };
        }

        if state.next_eligible > now {
            Gate::WaitUntil(state.next_eligible)
        } else {
            Gate::Allowed
        }
    }

    /// Apply one classified attempt to a domain's state.
    ///
    /// `retry_after` is a server-provided minimum wait; it is honoured as a
    /// floor on the computed delay, up to the configured maximum delay.
    pub fn record(
        &self,
        domain: &str,
        signal: DefenseSignal,
        base_delay: Duration,
        retry_after: Option<Duration>,
    ) -> BackoffUpdate {
        let domain = normalize_domain(domain);
        let now = self.clock.now();
        let state = self.state_or_insert(&domain, base_delay, now);
        let mut state = state.lock();

        state.total_attempts += 1;
        state.last_signal = Some(signal);
        let mut entered_cooldown = false;

        if signal.is_clean() {
            if state.consecutive_failures > 0 || state.cooldown.is_some() {
                info!(
                    domain = %domain,
                    failures = state.consecutive_failures,
                    "Domain recovered from backoff"
                );
            }
            state.consecutive_failures = 0;
            state.total_successes += 1;
            state.current_delay = base_delay;
            state.next_eligible = now + to_chrono(base_delay);
            state.cooldown = None;
        } else {
            state.total_failures += 1;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);

            let mut delay = self.backoff_delay(base_delay, state.consecutive_failures);
            if let Some(retry_after) = retry_after {
                delay = delay.max(retry_after.min(self.config.max_delay()));
            }

            let candidate = now + to_chrono(delay);
            if candidate > state.next_eligible {
                state.next_eligible = candidate;
            }
            state.current_delay = delay;

            if signal.is_block()
                && state.consecutive_failures >= self.config.cooldown_threshold
                && !state.in_cooldown(now)
            {
                state.cooldown = Some(Cooldown {
                    since: now,
                    until: self
                        .config
                        .cooldown_duration()
                        .map(|d| now + to_chrono(d)),
                });
                entered_cooldown = true;
                warn!(
                    domain = %domain,
                    signal = %signal,
                    failures = state.consecutive_failures,
                    "Domain entered cooldown"
                );
            } else {
                debug!(
                    domain = %domain,
                    signal = %signal,
                    failures = state.consecutive_failures,
                    delay_ms = millis(delay),
                    "Backing off"
                );
            }
        }

        BackoffUpdate {
            signal,
            consecutive_failures: state.consecutive_failures,
            delay: state.current_delay,
            next_eligible: state.next_eligible,
            entered_cooldown,
            in_cooldown: state.in_cooldown(now),
        }
    }

    /// Operator reset: clears failures and cooldown, keeps counters.
    /// Returns false for a domain the scheduler has never seen.
    pub fn reset(&self, domain: &str) -> bool {
        let Some(state) = self.state(domain) else {
            return false;
        };
        let mut state = state.lock();
        state.consecutive_failures = 0;
        state.cooldown = None;
        state.next_eligible = self.clock.now();
        info!(domain = %normalize_domain(domain), "Backoff state reset");
        true
    }

    pub fn stats(&self, domain: &str) -> Option<DomainStats> {
        let key = normalize_domain(domain);
        let state = self.state(&key)?;
        let state = state.lock();
        Some(self.snapshot(key, &state))
    }

    /// Stats for every known domain, sorted by domain
    pub fn all_stats(&self) -> Vec<DomainStats> {
        let entries: Vec<(String, Arc<Mutex<DomainBackoffState>>)> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut stats: Vec<DomainStats> = entries
            .into_iter()
            .map(|(domain, state)| self.snapshot(domain, &state.lock()))
            .collect();
        stats.sort_by(|a, b| a.domain.cmp(&b.domain));
        stats
    }

    fn snapshot(&self, domain: String, state: &DomainBackoffState) -> DomainStats {
        let now = self.clock.now();
        DomainStats {
            domain,
            attempts: state.total_attempts,
            successes: state.total_successes,
            failures: state.total_failures,
            consecutive_failures: state.consecutive_failures,
            current_delay_ms: millis(state.current_delay),
            next_eligible: state.next_eligible,
            in_cooldown: state.in_cooldown(now),
            cooldown_until: state.cooldown.and_then(|c| c.until),
            last_signal: state.last_signal,
        }
    }

    /// base * 2^failures, jittered and capped at the configured maximum,
    /// never below the base delay
    fn backoff_delay(&self, base_delay: Duration, failures: u32) -> Duration {
        let max = self.config.max_delay().as_secs_f64();
        let exponent = failures.min(32) as i32;
        let raw = base_delay.as_secs_f64() * 2f64.powi(exponent) * self.jitter_factor();
        let capped = raw.clamp(0.0, max);
        Duration::from_secs_f64(capped).max(base_delay)
    }

    fn jitter_factor(&self) -> f64 {
        let j = self.config.jitter;
        if j <= 0.0 {
            return 1.0;
        }
        rand::thread_rng().gen_range((1.0 - j)..=(1.0 + j))
    }

    fn state(&self, domain: &str) -> Option<Arc<Mutex<DomainBackoffState>>> {
        self.states
            .get(&normalize_domain(domain))
            .map(|s| Arc::clone(&s))
    }

    fn state_or_insert(
        &self,
        domain: &str,
        base_delay: Duration,
        now: DateTime<Utc>,
    ) -> Arc<Mutex<DomainBackoffState>> {
        let entry = self
            .states
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainBackoffState::new(base_delay, now))));
        Arc::clone(&entry)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
