//! Common traits for extraction strategies

use pressroom_core::{ExtractedArticle, ExtractionConfig, ExtractionOutcome, SelectorSet, SiteProfile, StrategyId};
use scraper::Html;
use thiserror::Error;

/// Errors from extraction setup
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Everything a strategy may look at besides the document
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub url: &'a str,
    pub profile: &'a SiteProfile,
    /// Template selectors, or the generic set for unknown sites
    pub selectors: &'a SelectorSet,
    pub config: &'a ExtractionConfig,
}

impl<'a> ExtractContext<'a> {
    /// Start an article attributed to `strategy`
    pub fn article(&self, title: String, body: String, strategy: StrategyId) -> ExtractedArticle {
        ExtractedArticle::new(self.url, &self.profile.domain, title, body, strategy)
    }

    /// Whether a body is long enough to count as a full article
    pub fn long_enough(&self, body: &str) -> bool {
        body.chars().count() >= self.config.min_content_chars
    }

    /// Body length relative to the minimum, capped at 1
    pub fn length_ratio(&self, body: &str) -> f64 {
        let min = self.config.min_content_chars.max(1) as f64;
        (body.chars().count() as f64 / min).min(1.0)
    }
}

/// An algorithm turning a parsed page into an article
pub trait ExtractionStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    fn extract(&self, document: &Html, ctx: &ExtractContext<'_>) -> ExtractionOutcome;
}
