//! Batch runner
//!
//! Pushes a list of URLs through the orchestrator with bounded parallelism.
//! Backoff deferrals are retried after sleeping out the wait; everything
//! else is final. Per-URL failures never abort the batch.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pressroom_core::{until, DomainStats};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::orchestrator::{Orchestrator, ProcessOutcome};

/// Number of tags listed in a report
pub const TOP_TAGS: usize = 10;

/// Batch settings
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// URLs in flight at once (further bounded by the orchestrator)
    pub concurrency: usize,
    /// How many times one URL may be rescheduled after a deferral
    pub max_deferrals: u32,
    /// Longest single sleep before a rescheduled attempt
    pub max_wait: Duration,
    /// Stops the batch; in-flight attempts end as `Cancelled`
    pub cancel: CancellationToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_deferrals: 3,
            max_wait: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_deferrals(mut self, max_deferrals: u32) -> Self {
        self.max_deferrals = max_deferrals;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Final result for one URL
#[derive(Debug, Clone, Serialize)]
pub struct UrlReport {
    pub url: String,
    pub outcome: ProcessOutcome,
    /// Times the URL was rescheduled before its final outcome
    pub deferrals: u32,
}

/// Summary of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Identifies the run in logs and result files
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<UrlReport>,
    pub domains: Vec<DomainStats>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn completed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_completed()).count()
    }

    /// Completed over total, 0 for an empty batch
    pub fn success_ratio(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.completed() as f64 / self.total() as f64
        }
    }

    /// Most frequent tags over completed articles, ties broken by name
    pub fn top_tags(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for article in self.results.iter().filter_map(|r| r.outcome.article()) {
            for tag in &article.tags {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut tags: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tags.truncate(limit);
        tags
    }

    /// Articles per source domain
    pub fn sources(&self) -> BTreeMap<String, usize> {
        let mut sources = BTreeMap::new();
        for article in self.results.iter().filter_map(|r| r.outcome.article()) {
            *sources.entry(article.source_domain.clone()).or_default() += 1;
        }
        sources
    }

    /// Count of every non-completed outcome by label
    pub fn failure_breakdown(&self) -> BTreeMap<String, usize> {
        let mut breakdown = BTreeMap::new();
        for result in self.results.iter().filter(|r| !r.outcome.is_completed()) {
            *breakdown.entry(result.outcome.label()).or_default() += 1;
        }
        breakdown
    }

    /// Mean word count of completed articles
    pub fn average_words(&self) -> f64 {
        let words: Vec<usize> = self
            .results
            .iter()
            .filter_map(|r| r.outcome.article())
            .map(|a| a.word_count)
            .collect();
        if words.is_empty() {
            0.0
        } else {
            words.iter().sum::<usize>() as f64 / words.len() as f64
        }
    }

    /// Write the summary to the log
    pub fn log_summary(&self) {
        let runtime = until(self.started_at, self.finished_at);
        info!(
            run_id = %self.run_id,
            "Batch finished in {:.1}s: {}/{} completed ({:.1}%)",
            runtime.as_secs_f64(),
            self.completed(),
            self.total(),
            self.success_ratio() * 100.0
        );
        if self.completed() > 0 {
            info!("Average article length: {:.0} words", self.average_words());
        }
        for (source, count) in self.sources() {
            info!("   {}: {} articles", source, count);
        }
        for (tag, count) in self.top_tags(TOP_TAGS) {
            info!("   tag {}: {}", tag, count);
        }
        for (label, count) in self.failure_breakdown() {
            info!("   {}: {}", label, count);
        }
    }
}

impl Orchestrator {
    /// Process `urls` and collect a report. Results keep input order.
    pub async fn run_batch(&self, urls: Vec<String>, options: BatchOptions) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = self.clock().now();
        info!(run_id = %run_id, "Starting batch of {} URLs", urls.len());

        let options = &options;
        let mut results: Vec<(usize, UrlReport)> = stream::iter(urls.into_iter().enumerate())
            .map(|(idx, url)| async move { (idx, self.run_one(url, options).await) })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        BatchReport {
            run_id,
            started_at,
            finished_at: self.clock().now(),
            results: results.into_iter().map(|(_, report)| report).collect(),
            domains: self.all_domain_stats(),
        }
    }

    async fn run_one(&self, url: String, options: &BatchOptions) -> UrlReport {
        let mut deferrals = 0;

        loop {
            let outcome = self.process_url_cancellable(&url, &options.cancel).await;

            let retry_at = match &outcome {
                ProcessOutcome::Deferred(deferral) if deferrals < options.max_deferrals => {
                    deferral.retry_at()
                }
                _ => None,
            };
            let Some(retry_at) = retry_at else {
                return UrlReport {
                    url,
                    outcome,
                    deferrals,
                };
            };

            let wait = until(self.clock().now(), retry_at).min(options.max_wait);
            deferrals += 1;
            debug!(url = %url, wait_ms = wait.as_millis() as u64, deferrals, "Rescheduling");

            tokio::select! {
                _ = options.cancel.cancelled() => {
                    return UrlReport {
                        url,
                        outcome: ProcessOutcome::Cancelled,
                        deferrals,
                    };
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
