//! Selector helpers and page metadata over `scraper` documents

use pressroom_core::text::{element_text, normalize_whitespace};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::traits::ExtractError;

/// Compile a CSS selector
pub fn compile(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Compile a selector list, skipping (and logging) entries that fail.
/// Registry selectors are validated at load time, so a failure here means
/// a selector set built in code.
pub fn compile_all(selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| match compile(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                warn!("Skipping selector: {}", e);
                None
            }
        })
        .collect()
}

/// Text of the first element, across selectors in order, with non-empty text
pub fn first_text(document: &Html, selectors: &[String]) -> Option<String> {
    compile_all(selectors).iter().find_map(|sel| {
        document
            .select(sel)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// Publish date from the first matching element, preferring a `datetime`
/// attribute over the element text
pub fn first_date(document: &Html, selectors: &[String]) -> Option<String> {
    compile_all(selectors).iter().find_map(|sel| {
        document.select(sel).find_map(|el| {
            el.value()
                .attr("datetime")
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .or_else(|| Some(element_text(el)).filter(|t| !t.is_empty()))
        })
    })
}

/// Texts of every match of the first selector that yields any text
pub fn all_texts(document: &Html, selectors: &[String]) -> Vec<String> {
    for sel in compile_all(selectors) {
        let texts: Vec<String> = document
            .select(&sel)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect();
        if !texts.is_empty() {
            return texts;
        }
    }
    Vec::new()
}

/// Remove every subtree matching one of `selectors`
pub fn strip(document: &mut Html, selectors: &[String]) -> usize {
    let ids: Vec<_> = compile_all(selectors)
        .iter()
        .flat_map(|sel| document.select(sel).map(|el| el.id()).collect::<Vec<_>>())
        .collect();

    let mut removed = 0;
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
            removed += 1;
        }
    }
    removed
}

/// `<meta>` content by `name` or `property`
pub fn meta_content(document: &Html, key: &str) -> Option<String> {
    let css = format!("meta[name=\"{key}\"], meta[property=\"{key}\"]");
    let sel = compile(&css).ok()?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(normalize_whitespace)
        .find(|c| !c.is_empty())
}

/// Text of the `<title>` element
pub fn title_tag(document: &Html) -> Option<String> {
    let sel = compile("title").ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Primary language subtag from `<html lang>`
pub fn document_language(document: &Html) -> Option<String> {
    let sel = compile("html").ok()?;
    let lang = document.select(&sel).next()?.value().attr("lang")?;
    let primary = lang.split(['-', '_']).next()?.trim().to_lowercase();
    (!primary.is_empty()).then_some(primary)
}

/// Metadata most article pages carry in `<head>`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title_tag: Option<String>,
    pub og_title: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub section: Option<String>,
    pub keywords: Option<String>,
    pub language: Option<String>,
}

impl PageMetadata {
    pub fn from_document(document: &Html) -> Self {
        Self {
            title_tag: title_tag(document),
            og_title: meta_content(document, "og:title"),
            author: meta_content(document, "author")
                .or_else(|| meta_content(document, "article:author")),
            published: meta_content(document, "article:published_time")
                .or_else(|| meta_content(document, "date")),
            section: meta_content(document, "article:section"),
            keywords: meta_content(document, "keywords")
                .or_else(|| meta_content(document, "news_keywords")),
            language: document_language(document),
        }
    }

    /// Best available headline from metadata
    pub fn headline(&self) -> Option<&str> {
        self.og_title.as_deref().or(self.title_tag.as_deref())
    }
}

/// Sum of link text length below an element, in chars
pub fn link_text_len(element: ElementRef<'_>) -> usize {
    match compile("a") {
        Ok(sel) => element
            .select(&sel)
            .map(|a| element_text(a).chars().count())
            .sum(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html lang="en-GB">
        <head>
            <title>Fallback Title | Site</title>
            <meta property="og:title" content="Open Graph Title">
            <meta name="author" content="Jane Reporter">
            <meta property="article:published_time" content="2024-03-01T10:00:00Z">
            <meta name="keywords" content="Transit, City Council">
        </head>
        <body>
            <nav><a href="/">Home</a></nav>
            <h1>  Headline   here </h1>
            <time datetime="2024-03-01">March 1</time>
            <p class="x"></p>
            <p class="x">First</p>
            <p class="x">Second</p>
        </body>
        </html>
    "#;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_text_skips_empty_matches() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(first_text(&doc, &strings(&[".missing", "p.x"])), Some("First".into()));
        assert_eq!(first_text(&doc, &strings(&["h1"])), Some("Headline here".into()));
    }

    #[test]
    fn test_first_date_prefers_datetime_attr() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(first_date(&doc, &strings(&["time"])), Some("2024-03-01".into()));
    }

    #[test]
    fn test_all_texts_uses_first_matching_selector() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(all_texts(&doc, &strings(&["article p", "p.x"])), vec!["First", "Second"]);
    }

    #[test]
    fn test_strip_removes_subtrees() {
        let mut doc = Html::parse_document(PAGE);
        assert_eq!(strip(&mut doc, &strings(&["nav"])), 1);
        assert!(first_text(&doc, &strings(&["nav"])).is_none());
    }

    #[test]
    fn test_page_metadata() {
        let doc = Html::parse_document(PAGE);
        let meta = PageMetadata::from_document(&doc);
        assert_eq!(meta.headline(), Some("Open Graph Title"));
        assert_eq!(meta.title_tag.as_deref(), Some("Fallback Title | Site"));
        assert_eq!(meta.author.as_deref(), Some("Jane Reporter"));
        assert_eq!(meta.published.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert_eq!(meta.keywords.as_deref(), Some("Transit, City Council"));
        assert_eq!(meta.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_invalid_selector_is_error() {
        assert!(matches!(compile("p[[["), Err(ExtractError::InvalidSelector { .. })));
        assert!(compile_all(&strings(&["p[[[", "p"])).len() == 1);
    }
}
