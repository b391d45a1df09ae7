//! Extraction strategy chain
//!
//! Runs strategies in order, stops at the first `Success`, and otherwise
//! keeps the best low-confidence result. The winning article is then
//! cleaned up: body noise removed, metadata gaps filled from `<meta>` tags,
//! tags attached.

use pressroom_core::text::{clean_body, clean_text, extract_tags};
use pressroom_core::{ExtractedArticle, ExtractionConfig, ExtractionOutcome, SiteProfile, SiteRegistry};
use scraper::Html;
use std::sync::Arc;
use tracing::debug;

use crate::dom::{strip, PageMetadata};
use crate::generic::GenericStrategy;
use crate::semantic::SemanticStrategy;
use crate::structural::StructuralStrategy;
use crate::traits::{ExtractContext, ExtractionStrategy};

/// Ordered strategies plus the post-processing applied to the winner
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    registry: Arc<SiteRegistry>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for ExtractionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionChain")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionChain {
    /// Structural, then semantic, then generic
    pub fn new(registry: Arc<SiteRegistry>, config: ExtractionConfig) -> Self {
        Self {
            strategies: vec![
                Box::new(StructuralStrategy::new()),
                Box::new(SemanticStrategy::new()),
                Box::new(GenericStrategy::new()),
            ],
            registry,
            config,
        }
    }

    /// Replace the strategy list
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract an article from raw HTML
    pub fn extract(&self, html: &str, url: &str, profile: &SiteProfile) -> ExtractionOutcome {
        if html.trim().is_empty() {
            return ExtractionOutcome::Failed("empty document".to_string());
        }

        let selectors = self.registry.selectors(profile.template.known());
        let mut document = Html::parse_document(html);
        let removed = strip(&mut document, &selectors.exclude);
        if removed > 0 {
            debug!(url, removed, "Stripped excluded elements");
        }

        let ctx = ExtractContext {
            url,
            profile,
            selectors,
            config: &self.config,
        };

        let mut outcome = self.run(&document, &ctx);
        if let Some(article) = outcome.article_mut() {
            self.post_process(article, &document);
        }
        if let ExtractionOutcome::LowConfidence(article, confidence) = &mut outcome {
            // Post-processing may clamp; keep both copies in step
            *confidence = article.confidence;
        }
        outcome
    }

    /// Chain policy over a parsed document
    pub fn run(&self, document: &Html, ctx: &ExtractContext<'_>) -> ExtractionOutcome {
        let mut best: Option<ExtractionOutcome> = None;
        let mut last_failure = None;

        for strategy in &self.strategies {
            let outcome = strategy.extract(document, ctx);
            debug!(
                url = ctx.url,
                strategy = %strategy.id(),
                confidence = outcome.confidence(),
                success = outcome.is_success(),
                "Strategy finished"
            );

            match outcome {
                ExtractionOutcome::Success(_) => return outcome,
                ExtractionOutcome::LowConfidence(_, confidence) => {
                    let better = best
                        .as_ref()
                        .map_or(true, |b| confidence > b.confidence());
                    if better {
                        best = Some(outcome);
                    }
                }
                ExtractionOutcome::Failed(reason) => {
                    last_failure = Some(format!("{}: {}", strategy.id(), reason));
                }
            }
        }

        best.unwrap_or_else(|| {
            ExtractionOutcome::Failed(
                last_failure.unwrap_or_else(|| "no strategies configured".to_string()),
            )
        })
    }

    fn post_process(&self, article: &mut ExtractedArticle, document: &Html) {
        let meta = PageMetadata::from_document(document);

        let body = clean_body(&article.body);
        article.set_body(body);
        article.title = clean_text(&article.title);

        if article.title.is_empty() {
            if let Some(headline) = meta.headline() {
                article.title = clean_text(headline);
            }
        }
        if article.author.is_none() {
            article.author = meta.author.clone();
        }
        if article.published.is_none() {
            article.published = meta.published.clone();
        }
        if article.category.is_none() {
            article.category = meta.section.clone();
        }
        if let Some(language) = &meta.language {
            article.language = language.clone();
        }

        article.tags = extract_tags(
            &article.body,
            meta.keywords.as_deref(),
            &self.config.tag_vocabulary,
            self.config.max_tags,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generic_profile, known_profile, BBC_ARTICLE, LINK_FARM, UNSTRUCTURED_BLOCK};
    use pressroom_core::{StrategyId, DEFAULT_PUBLISH_THRESHOLD};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain() -> ExtractionChain {
        ExtractionChain::new(
            Arc::new(SiteRegistry::load_embedded().unwrap()),
            ExtractionConfig::default(),
        )
    }

    /// Fails every time, counting calls
    struct Counting(Arc<AtomicUsize>);

    impl ExtractionStrategy for Counting {
        fn id(&self) -> StrategyId {
            StrategyId::Semantic
        }

        fn extract(&self, _document: &Html, _ctx: &ExtractContext<'_>) -> ExtractionOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            ExtractionOutcome::Failed("counting".to_string())
        }
    }

    #[test]
    fn test_known_template_stops_at_structural() {
        let profile = known_profile("bbc.com", "bbc");
        let outcome = chain().extract(BBC_ARTICLE, "https://www.bbc.com/news/articles/abc", &profile);

        let ExtractionOutcome::Success(article) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(article.strategy, StrategyId::Structural);
        assert!(!article.body.contains("Related stories"));
        assert!(!article.body.contains("Share this"));
        assert_eq!(article.category.as_deref(), Some("World"));
        assert_eq!(article.language, "en");
        assert!(article.tags.contains(&"Transit".to_string()));
        assert!(article.tags.contains(&"Automation".to_string()));
    }

    #[test]
    fn test_structural_success_skips_later_strategies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = chain().with_strategies(vec![
            Box::new(StructuralStrategy::new()),
            Box::new(Counting(Arc::clone(&calls))),
        ]);
        let profile = known_profile("bbc.com", "bbc");
        assert!(chain.extract(BBC_ARTICLE, "https://www.bbc.com/x", &profile).is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unstructured_block_falls_to_generic() {
        let profile = generic_profile("unknown-news.example");
        let outcome = chain().extract(UNSTRUCTURED_BLOCK, "https://unknown-news.example/a", &profile);

        let ExtractionOutcome::LowConfidence(article, confidence) = outcome else {
            panic!("expected low confidence, got {outcome:?}");
        };
        assert_eq!(article.strategy, StrategyId::Generic);
        assert!(confidence < DEFAULT_PUBLISH_THRESHOLD);
    }

    #[test]
    fn test_keeps_best_low_confidence() {
        let profile = generic_profile("example.org");
        let outcome = chain().extract(LINK_FARM, "https://example.org/", &profile);
        assert!(matches!(outcome, ExtractionOutcome::LowConfidence(..)));
    }

    #[test]
    fn test_empty_document_fails() {
        let profile = generic_profile("example.org");
        assert!(chain().extract("  ", "https://example.org/", &profile).is_failed());
        assert!(chain()
            .extract("<html><body></body></html>", "https://example.org/", &profile)
            .is_failed());
    }

    #[test]
    fn test_metadata_fallbacks_fill_gaps() {
        let html = r#"<html lang="de"><head>
            <meta property="og:title" content="Headline from metadata">
            <meta name="author" content="Kim Berger">
            <meta property="article:published_time" content="2024-06-01">
            </head><body><div>A page whose only content is this one loose block of text without any headline element.</div></body></html>"#;
        let profile = generic_profile("example.de");
        let outcome = chain().extract(html, "https://example.de/a", &profile);
        let article = outcome.article().unwrap();
        assert_eq!(article.title, "Headline from metadata");
        assert_eq!(article.author.as_deref(), Some("Kim Berger"));
        assert_eq!(article.published.as_deref(), Some("2024-06-01"));
        assert_eq!(article.language, "de");
    }
}
