//! Semantic strategy
//!
//! Guesses the main content region from text density, without named
//! selectors. Candidates are block containers; each is scored on text
//! length and paragraph structure, penalized for links and boilerplate
//! class names.

use pressroom_core::text::{element_text, normalize_whitespace};
use pressroom_core::{ExtractionOutcome, StrategyId};
use regex::Regex;
use scraper::{ElementRef, Html};
use std::sync::LazyLock;
use tracing::debug;

use crate::dom::{compile, first_text, link_text_len, PageMetadata};
use crate::traits::{ExtractContext, ExtractionStrategy};

/// Candidate containers for the main content
const CANDIDATES: &str = "article, main, section, div, td";

/// Link density at or above this is navigation, not prose
pub const MAX_LINK_DENSITY: f64 = 0.5;

/// Paragraphs needed for a confident result
pub const MIN_PARAGRAPHS: usize = 3;

/// Paragraphs at least this long count as substantive
const SUBSTANTIVE_PARAGRAPH_CHARS: usize = 80;

/// Text length beyond this adds nothing to the score
const MAX_SCORED_CHARS: usize = 8000;

static BOILERPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(nav|navbar|menu|footer|header|sidebar|comments?|share|social|related|promo|advert\w*|ads?|cookie\w*|banner|subscribe|newsletter|breadcrumbs?)\b",
    )
    .unwrap()
});

/// Scored content region
#[derive(Debug, Clone)]
struct Candidate {
    paragraphs: Vec<String>,
    text_len: usize,
    link_density: f64,
    score: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SemanticStrategy;

impl SemanticStrategy {
    pub fn new() -> Self {
        Self
    }

    fn is_boilerplate(element: ElementRef<'_>) -> bool {
        let attrs = [element.value().attr("class"), element.value().attr("id")];
        attrs
            .iter()
            .flatten()
            .any(|value| BOILERPLATE_REGEX.is_match(&value.replace(['-', '_'], " ")))
    }

    fn score(element: ElementRef<'_>) -> Option<Candidate> {
        let text = element_text(element);
        let text_len = text.chars().count();
        if text_len == 0 {
            return None;
        }

        let p_sel = compile("p").ok()?;
        let paragraphs: Vec<String> = element
            .select(&p_sel)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();
        let substantive = paragraphs
            .iter()
            .filter(|p| p.chars().count() >= SUBSTANTIVE_PARAGRAPH_CHARS)
            .count();

        let a_sel = compile("a").ok()?;
        let link_count = element.select(&a_sel).count();
        let link_density = link_text_len(element) as f64 / text_len as f64;

        let mut score = text_len.min(MAX_SCORED_CHARS) as i64;
        score += paragraphs.len() as i64 * 200;
        score += substantive as i64 * 300;
        score -= link_count as i64 * 50;
        if link_density > MAX_LINK_DENSITY {
            score /= 2;
        }

        Some(Candidate {
            paragraphs,
            text_len,
            link_density,
            score,
        })
    }

    fn best_candidate(document: &Html) -> Option<Candidate> {
        let sel = compile(CANDIDATES).ok()?;
        document
            .select(&sel)
            .filter(|el| !Self::is_boilerplate(*el))
            .filter_map(Self::score)
            .max_by_key(|c| c.score)
    }

    fn title(document: &Html) -> String {
        first_text(document, &["h1".to_string()])
            .or_else(|| PageMetadata::from_document(document).headline().map(normalize_whitespace))
            .unwrap_or_default()
    }
}

impl ExtractionStrategy for SemanticStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Semantic
    }

    fn extract(&self, document: &Html, ctx: &ExtractContext<'_>) -> ExtractionOutcome {
        let Some(best) = Self::best_candidate(document) else {
            return ExtractionOutcome::Failed("no text-bearing container".to_string());
        };

        // Density scoring needs paragraph structure to mean anything
        if best.paragraphs.is_empty() {
            return ExtractionOutcome::Failed("best container has no paragraphs".to_string());
        }

        let title = Self::title(document);
        let body = best.paragraphs.join("\n\n");
        let confident = !title.is_empty()
            && ctx.long_enough(&body)
            && best.link_density < MAX_LINK_DENSITY
            && best.paragraphs.len() >= MIN_PARAGRAPHS;

        let link_factor = (1.0 - best.link_density).clamp(0.0, 1.0);
        let confidence = if confident {
            0.6 + 0.2 * link_factor
        } else {
            let paragraph_ratio = (best.paragraphs.len() as f64 / MIN_PARAGRAPHS as f64).min(1.0);
            let title_factor = if title.is_empty() { 0.5 } else { 1.0 };
            0.55 * ctx.length_ratio(&body) * paragraph_ratio * link_factor * title_factor
        };

        debug!(
            url = ctx.url,
            paragraphs = best.paragraphs.len(),
            text_len = best.text_len,
            link_density = best.link_density,
            confident,
            confidence,
            "Semantic extraction"
        );

        let article = ctx
            .article(title, body, StrategyId::Semantic)
            .with_confidence(confidence);

        if confident {
            ExtractionOutcome::Success(article)
        } else {
            let confidence = article.confidence;
            ExtractionOutcome::LowConfidence(article, confidence)
        }
    }
}
