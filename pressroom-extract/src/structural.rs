//! Structural strategy
//!
//! Applies the site's registered selector set (or the generic set) field by
//! field. Only this strategy benefits from knowing the site, so its
//! confidence is highest for known templates.

use pressroom_core::{ExtractionOutcome, StrategyId};
use scraper::Html;
use tracing::debug;

use crate::dom::{all_texts, first_date, first_text};
use crate::traits::{ExtractContext, ExtractionStrategy};

/// Confidence for a full match on a registered template
pub const KNOWN_TEMPLATE_CONFIDENCE: f64 = 0.9;

/// Confidence for a full match on generic selectors
pub const GENERIC_SELECTOR_CONFIDENCE: f64 = 0.75;

/// Deducted per missing optional field (author, date)
const MISSING_FIELD_PENALTY: f64 = 0.05;

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralStrategy;

impl StructuralStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionStrategy for StructuralStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Structural
    }

    fn extract(&self, document: &Html, ctx: &ExtractContext<'_>) -> ExtractionOutcome {
        let selectors = ctx.selectors;

        let title = first_text(document, &selectors.title).unwrap_or_default();
        let paragraphs = all_texts(document, &selectors.body);

        if title.is_empty() && paragraphs.is_empty() {
            return ExtractionOutcome::Failed("no title or body selector matched".to_string());
        }

        let body = paragraphs.join("\n\n");
        let author = first_text(document, &selectors.author);
        let published = first_date(document, &selectors.date);
        let category = first_text(document, &selectors.category);

        let base = if ctx.profile.is_known() {
            KNOWN_TEMPLATE_CONFIDENCE
        } else {
            GENERIC_SELECTOR_CONFIDENCE
        };
        let penalty = [author.is_none(), published.is_none()]
            .iter()
            .filter(|missing| **missing)
            .count() as f64
            * MISSING_FIELD_PENALTY;

        let complete = !title.is_empty() && ctx.long_enough(&body);
        let confidence = if complete {
            base - penalty
        } else {
            // Partial match: scale by how much of the required content exists
            let title_part = if title.is_empty() { 0.0 } else { 0.5 };
            let completeness = title_part + 0.5 * ctx.length_ratio(&body);
            (base * completeness * 0.6 - penalty).max(0.05)
        };

        debug!(
            url = ctx.url,
            template = %ctx.profile.template,
            paragraphs = paragraphs.len(),
            complete,
            confidence,
            "Structural extraction"
        );

        let article = ctx
            .article(title, body, StrategyId::Structural)
            .with_author(author)
            .with_published(published)
            .with_category(category)
            .with_confidence(confidence);

        if complete {
            ExtractionOutcome::Success(article)
        } else {
            ExtractionOutcome::LowConfidence(article, confidence)
        }
    }
}
