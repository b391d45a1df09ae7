//! Extracted article records and extraction outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::text::word_count;

/// Which extraction strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Registered or generic CSS selector sets
    Structural,
    /// Text-density scan over block containers
    Semantic,
    /// Largest contiguous text block plus `<title>`
    Generic,
}

impl StrategyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::Structural => "structural",
            StrategyId::Semantic => "semantic",
            StrategyId::Generic => "generic",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    /// Stable id derived from the URL
    pub id: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    /// Publish date as found on the page (not normalized)
    pub published: Option<String>,
    pub category: Option<String>,
    /// Normalized host the article came from
    pub source_domain: String,
    pub tags: Vec<String>,
    /// Strategy that produced this record
    pub strategy: StrategyId,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
    pub word_count: usize,
    pub language: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedArticle {
    pub fn new(url: &str, source_domain: &str, title: String, body: String, strategy: StrategyId) -> Self {
        Self {
            id: Self::compute_id(url),
            url: url.to_string(),
            word_count: word_count(&body),
            title,
            body,
            author: None,
            published: None,
            category: None,
            source_domain: source_domain.to_string(),
            tags: Vec::new(),
            strategy,
            confidence: 0.0,
            language: crate::DEFAULT_LANGUAGE.to_string(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author.filter(|a| !a.is_empty());
        self
    }

    pub fn with_published(mut self, published: Option<String>) -> Self {
        self.published = published.filter(|p| !p.is_empty());
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category.filter(|c| !c.is_empty());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Replace the body, keeping the word count in sync
    pub fn set_body(&mut self, body: String) {
        self.word_count = word_count(&body);
        self.body = body;
    }

    fn compute_id(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())[..16].to_string()
    }
}

/// Result of one strategy, or of the whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// Required fields present and confidence high
    Success(ExtractedArticle),
    /// Partial data; the score says how much to trust it
    LowConfidence(ExtractedArticle, f64),
    /// Nothing usable
    Failed(String),
}

impl ExtractionOutcome {
    /// Confidence of the outcome; failures score zero
    pub fn confidence(&self) -> f64 {
        match self {
            ExtractionOutcome::Success(article) => article.confidence,
            ExtractionOutcome::LowConfidence(_, confidence) => *confidence,
            ExtractionOutcome::Failed(_) => 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExtractionOutcome::Failed(_))
    }

    pub fn article(&self) -> Option<&ExtractedArticle> {
        match self {
            ExtractionOutcome::Success(article) | ExtractionOutcome::LowConfidence(article, _) => {
                Some(article)
            }
            ExtractionOutcome::Failed(_) => None,
        }
    }

    pub fn article_mut(&mut self) -> Option<&mut ExtractedArticle> {
        match self {
            ExtractionOutcome::Success(article) | ExtractionOutcome::LowConfidence(article, _) => {
                Some(article)
            }
            ExtractionOutcome::Failed(_) => None,
        }
    }

    /// Strategy that produced the data, if any
    pub fn strategy(&self) -> Option<StrategyId> {
        self.article().map(|a| a.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_builder() {
        let article = ExtractedArticle::new(
            "https://www.bbc.com/news/1",
            "bbc.com",
            "Title".to_string(),
            "one two three".to_string(),
            StrategyId::Structural,
        )
        .with_confidence(1.7)
        .with_author(Some(String::new()))
        .with_category(Some("Tech".to_string()));

        assert_eq!(article.confidence, 1.0);
        assert_eq!(article.author, None);
        assert_eq!(article.category.as_deref(), Some("Tech"));
        assert_eq!(article.word_count, 3);
        assert_eq!(article.id.len(), 16);
    }

    #[test]
    fn test_id_is_stable_per_url() {
        let a = ExtractedArticle::new("https://x.com/a", "x.com", String::new(), String::new(), StrategyId::Generic);
        let b = ExtractedArticle::new("https://x.com/a", "x.com", String::new(), String::new(), StrategyId::Semantic);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_outcome_confidence() {
        let article = ExtractedArticle::new("u", "d", "t".into(), "b".into(), StrategyId::Generic)
            .with_confidence(0.3);
        assert_eq!(ExtractionOutcome::LowConfidence(article.clone(), 0.3).confidence(), 0.3);
        assert_eq!(ExtractionOutcome::Success(article.with_confidence(0.9)).confidence(), 0.9);
        assert_eq!(ExtractionOutcome::Failed("empty".into()).confidence(), 0.0);
    }

    #[test]
    fn test_article_json_shape() {
        let article = ExtractedArticle::new("https://x.com/a", "x.com", "T".into(), "b".into(), StrategyId::Semantic)
            .with_tags(vec!["Tech".to_string()]);
        let value = serde_json::to_value(&article).unwrap();
        assert_eq!(value["strategy"], "semantic");
        assert_eq!(value["source_domain"], "x.com");
        assert_eq!(value["language"], "en");
        assert!(value["author"].is_null());
    }
}
