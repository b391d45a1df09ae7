//! Text utilities shared by detection and extraction
//!
//! - Visible-text walks over parsed HTML (script/style subtrees skipped)
//! - Whitespace and noise cleanup
//! - Keyword tag extraction

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Maximum number of tags attached to an article
pub const MAX_TAGS: usize = 10;

/// Paragraphs shorter than this are dropped by [`clean_body`]
pub const MIN_PARAGRAPH_CHARS: usize = 50;

/// Default keyword vocabulary for tag extraction
pub const DEFAULT_TAG_VOCABULARY: &[&str] = &[
    "artificial intelligence",
    "machine learning",
    "blockchain",
    "cryptocurrency",
    "cybersecurity",
    "data privacy",
    "cloud computing",
    "software",
    "hardware",
    "startup",
    "innovation",
    "digital transformation",
    "automation",
    "robotics",
    "internet of things",
    "5g",
    "quantum computing",
];

/// Elements whose text is never visible
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "svg"];

static NOISE_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(share this article|follow us on|subscribe to|click here|read more:|related:)")
        .unwrap()
});

static SKIP_PARAGRAPH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(share this|follow us|subscribe|advertisement|related articles|more from|trending now)",
    )
    .unwrap()
});

static CONTROL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{Cc}&&[^\n\t]]").unwrap());

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_invisible(name: &str) -> bool {
    INVISIBLE.contains(&name)
}

/// Visible text below an element, whitespace-normalized
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();

    for node_ref in element.descendants() {
        if let Node::Text(text_node) = node_ref.value() {
            let hidden = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| is_invisible(el.name()))
                    .unwrap_or(false)
            });

            if !hidden {
                let trimmed = text_node.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed);
                }
            }
        }
    }

    normalize_whitespace(&parts.join(" "))
}

/// Text directly owned by an element (its own text nodes and inline
/// children), excluding nested block-level elements
pub fn own_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_own_text(element, &mut parts);
    normalize_whitespace(&parts.join(" "))
}

fn collect_own_text<'a>(element: ElementRef<'a>, parts: &mut Vec<&'a str>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed);
                }
            }
            Node::Element(el) => {
                if is_invisible(el.name()) || is_block(el.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_own_text(child_el, parts);
                }
            }
            _ => {}
        }
    }
}

/// Block-level elements for contiguity purposes
pub fn is_block(name: &str) -> bool {
    matches!(
        name,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "body"
            | "dd"
            | "div"
            | "dl"
            | "dt"
            | "fieldset"
            | "figcaption"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "li"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "td"
            | "th"
            | "tr"
            | "ul"
    )
}

/// Visible text of the whole document body
pub fn visible_text(document: &Html) -> String {
    match scraper::Selector::parse("body") {
        Ok(sel) => document
            .select(&sel)
            .next()
            .map(element_text)
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Count of visible characters in an HTML string
pub fn visible_len(html: &str) -> usize {
    let document = Html::parse_document(html);
    visible_text(&document).chars().count()
}

/// Clean a single field value: strip control characters and trailing
/// share/subscribe noise, normalize whitespace
pub fn clean_text(text: &str) -> String {
    let text = CONTROL_REGEX.replace_all(text, "");
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| !NOISE_LINE_REGEX.is_match(line))
        .collect();
    normalize_whitespace(&kept.join(" "))
}

/// Clean an article body made of blank-line separated paragraphs.
///
/// Short paragraphs and boilerplate are dropped. If nothing survives the
/// original text is returned normalized, so cleanup never empties a body.
pub fn clean_body(content: &str) -> String {
    let kept: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
        .filter(|p| !SKIP_PARAGRAPH_REGEX.is_match(p))
        .map(clean_text)
        .filter(|p| !p.is_empty())
        .collect();

    if kept.is_empty() {
        return clean_text(content);
    }

    kept.join("\n\n")
}

/// Number of whitespace-separated words
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Extract tags from meta keywords and a keyword vocabulary.
///
/// Meta keywords come first, in document order; vocabulary hits are title
/// cased. Duplicates (case-insensitive) are dropped.
pub fn extract_tags(
    content: &str,
    meta_keywords: Option<&str>,
    vocabulary: &[String],
    max_tags: usize,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut tags = Vec::new();

    let mut push = |tag: String, tags: &mut Vec<String>| {
        let key = tag.to_lowercase();
        if !tag.is_empty() && seen.insert(key) {
            tags.push(tag);
        }
    };

    if let Some(keywords) = meta_keywords {
        for kw in keywords.split(',') {
            push(normalize_whitespace(kw), &mut tags);
        }
    }

    let lower = content.to_lowercase();
    for keyword in vocabulary {
        let needle = keyword.to_lowercase();
        if contains_word(&lower, &needle) {
            push(title_case(keyword), &mut tags);
        }
    }

    tags.truncate(max_tags);
    tags
}

/// Substring match on word boundaries
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_skips_scripts() {
        let html = r#"
            <html>
            <head><title>Test Page</title></head>
            <body>
                <script>var x = 1;</script>
                <h1>Hello World</h1>
                <p>This is test content.</p>
                <style>.x { color: red; }</style>
            </body>
            </html>
        "#;

        let text = visible_text(&Html::parse_document(html));
        assert!(text.contains("Hello World"));
        assert!(text.contains("test content"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_own_text_excludes_nested_blocks() {
        let html = r#"<html><body><div id="d">Outer <b>bold</b> text<p>Inner paragraph</p></div></body></html>"#;
        let doc = Html::parse_document(html);
        let sel = scraper::Selector::parse("#d").unwrap();
        let div = doc.select(&sel).next().unwrap();
        assert_eq!(own_text(div), "Outer bold text");
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  hello   world  \n\t  test  ";
        assert_eq!(normalize_whitespace(input), "hello world test");
    }

    #[test]
    fn test_clean_text_drops_noise_lines() {
        let cleaned = clean_text("Real headline\nShare this article on social media");
        assert_eq!(cleaned, "Real headline");
    }

    #[test]
    fn test_clean_body_filters_short_and_boilerplate() {
        let body = format!(
            "{}\n\nToo short.\n\nSubscribe to our newsletter for more updates every single morning.\n\n{}",
            "The first paragraph is long enough to be kept in the cleaned body text.",
            "The last paragraph also carries enough words to pass the length filter."
        );
        let cleaned = clean_body(&body);
        assert_eq!(cleaned.split("\n\n").count(), 2);
        assert!(!cleaned.contains("Subscribe"));
    }

    #[test]
    fn test_clean_body_never_empties() {
        assert_eq!(clean_body("Short text."), "Short text.");
    }

    #[test]
    fn test_extract_tags_meta_then_vocabulary() {
        let vocab: Vec<String> = DEFAULT_TAG_VOCABULARY.iter().map(|s| s.to_string()).collect();
        let tags = extract_tags(
            "A startup applies machine learning to blockchain audits.",
            Some("Finance, startup , "),
            &vocab,
            MAX_TAGS,
        );
        assert_eq!(tags[0], "Finance");
        assert_eq!(tags[1], "startup");
        assert!(tags.contains(&"Machine Learning".to_string()));
        assert!(tags.contains(&"Blockchain".to_string()));
        // "startup" from the vocabulary is a duplicate of the meta keyword
        assert_eq!(tags.iter().filter(|t| t.eq_ignore_ascii_case("startup")).count(), 1);
    }

    #[test]
    fn test_vocabulary_respects_word_boundaries() {
        let vocab = vec!["5g".to_string()];
        assert!(extract_tags("Carriers roll out 5g networks", None, &vocab, 10).len() == 1);
        assert!(extract_tags("Code 35gx found", None, &vocab, 10).is_empty());
    }

    #[test]
    fn test_truncate_chars_on_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
