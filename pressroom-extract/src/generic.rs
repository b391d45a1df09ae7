//! Last-resort strategy
//!
//! Takes the largest contiguous text block (the longest text a single
//! block-level element owns directly) as the body and the `<title>` tag as
//! the title. It always yields a low-confidence result when the page has
//! any text, so the chain terminates with something.

use pressroom_core::text::{own_text, visible_text};
use pressroom_core::{ExtractionOutcome, StrategyId};
use scraper::Html;
use tracing::debug;

use crate::dom::{compile, first_text, title_tag};
use crate::traits::{ExtractContext, ExtractionStrategy};

/// Ceiling on generic confidence, kept under the default publish threshold
pub const MAX_GENERIC_CONFIDENCE: f64 = 0.45;

/// Floor for a page that has a title but no body text
const TITLE_ONLY_CONFIDENCE: f64 = 0.05;

#[derive(Debug, Default, Clone, Copy)]
pub struct GenericStrategy;

impl GenericStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Longest directly-owned text of any block element
    fn largest_block(document: &Html) -> Option<String> {
        let sel = compile("*").ok()?;
        document
            .select(&sel)
            .filter(|el| pressroom_core::text::is_block(el.value().name()))
            .map(own_text)
            .filter(|t| !t.is_empty())
            .max_by_key(|t| t.chars().count())
    }
}

impl ExtractionStrategy for GenericStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Generic
    }

    fn extract(&self, document: &Html, ctx: &ExtractContext<'_>) -> ExtractionOutcome {
        let body = Self::largest_block(document)
            .or_else(|| Some(visible_text(document)).filter(|t| !t.is_empty()))
            .unwrap_or_default();
        let title = title_tag(document)
            .or_else(|| first_text(document, &["h1".to_string()]))
            .unwrap_or_default();

        if body.is_empty() && title.is_empty() {
            return ExtractionOutcome::Failed("document has no text".to_string());
        }

        // Scale with length up to four times the minimum content length
        let length = (body.chars().count() as f64
            / (ctx.config.min_content_chars.max(1) * 4) as f64)
            .min(1.0);
        let mut confidence = if body.is_empty() {
            TITLE_ONLY_CONFIDENCE
        } else {
            0.15 + 0.3 * length
        };
        if title.is_empty() {
            confidence *= 0.8;
        }
        let confidence = confidence.min(MAX_GENERIC_CONFIDENCE);

        debug!(url = ctx.url, chars = body.len(), confidence, "Generic extraction");

        let article = ctx
            .article(title, body, StrategyId::Generic)
            .with_confidence(confidence);
        ExtractionOutcome::LowConfidence(article, confidence)
    }
}
