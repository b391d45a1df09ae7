//! Known-site template registry
//!
//! Templates are plain data: a list of domains, a politeness delay, a
//! rendering hint and a selector set. The registry is loaded from TOML
//! (an embedded default, or a file) and validated once at startup.

use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::config::{read_file, ConfigError};
use crate::fetch::RenderingHint;

/// Reserved id for the fallback selector set
pub const GENERIC_TEMPLATE_ID: &str = "generic";

/// Delay applied to unknown domains when the registry does not set one
pub const DEFAULT_GENERIC_DELAY_MS: u64 = 5000;

const EMBEDDED_SITES: &str = include_str!("../sites/default.toml");

/// CSS selectors for each article field, tried in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub title: Vec<String>,
    pub body: Vec<String>,
    #[serde(default)]
    pub author: Vec<String>,
    #[serde(default)]
    pub date: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
    /// Subtrees removed before extraction
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl SelectorSet {
    fn fields(&self) -> [(&'static str, &Vec<String>); 6] {
        [
            ("title", &self.title),
            ("body", &self.body),
            ("author", &self.author),
            ("date", &self.date),
            ("category", &self.category),
            ("exclude", &self.exclude),
        ]
    }

    fn validate(&self, template: &str) -> Result<(), ConfigError> {
        if self.title.is_empty() {
            return Err(ConfigError::MissingSelectors {
                template: template.to_string(),
                field: "title",
            });
        }
        if self.body.is_empty() {
            return Err(ConfigError::MissingSelectors {
                template: template.to_string(),
                field: "body",
            });
        }

        for (field, selectors) in self.fields() {
            for selector in selectors {
                if Selector::parse(selector).is_err() {
                    return Err(ConfigError::InvalidSelector {
                        template: template.to_string(),
                        field,
                        selector: selector.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A known site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteTemplate {
    pub id: String,
    pub domains: Vec<String>,
    /// Minimum delay between requests to this site
    pub base_delay_ms: u64,
    #[serde(default)]
    pub rendering: RenderingHint,
    /// Accept-Language override for requests to this site
    #[serde(default)]
    pub accept_language: Option<String>,
    pub selectors: SelectorSet,
}

impl SiteTemplate {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Whether `domain` equals one of this template's domains or is a
    /// subdomain of one
    pub fn matches(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| domain_matches(domain, d))
    }
}

/// Exact match, or suffix match on a label boundary
pub fn domain_matches(domain: &str, pattern: &str) -> bool {
    let domain = domain.trim_end_matches('.');
    let pattern = pattern.trim_end_matches('.');
    if domain.eq_ignore_ascii_case(pattern) {
        return true;
    }
    domain.len() > pattern.len()
        && domain.to_ascii_lowercase().ends_with(&pattern.to_ascii_lowercase())
        && domain.as_bytes()[domain.len() - pattern.len() - 1] == b'.'
}

#[derive(Debug, Deserialize)]
struct GenericSection {
    #[serde(default = "default_generic_delay")]
    base_delay_ms: u64,
    selectors: SelectorSet,
}

fn default_generic_delay() -> u64 {
    DEFAULT_GENERIC_DELAY_MS
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    generic: GenericSection,
    #[serde(default)]
    templates: Vec<SiteTemplate>,
}

/// Registry of known-site templates plus the generic fallback
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    templates: Vec<SiteTemplate>,
    generic: SelectorSet,
    generic_delay: Duration,
}

impl SiteRegistry {
    /// Load the registry shipped with the crate
    pub fn load_embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str("embedded sites", EMBEDDED_SITES)
    }

    /// Load a registry file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::from_toml_str(&path.display().to_string(), &content)
    }

    /// Parse and validate a registry document
    pub fn from_toml_str(origin: &str, content: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile =
            toml::from_str(content).map_err(|e| ConfigError::parse(origin, e))?;

        file.generic.selectors.validate(GENERIC_TEMPLATE_ID)?;

        let mut ids = HashSet::new();
        for template in &file.templates {
            if template.id == GENERIC_TEMPLATE_ID {
                return Err(ConfigError::ReservedTemplate(template.id.clone()));
            }
            if !ids.insert(template.id.as_str()) {
                return Err(ConfigError::DuplicateTemplate(template.id.clone()));
            }
            if template.domains.iter().all(|d| d.trim().is_empty()) {
                return Err(ConfigError::EmptyDomains(template.id.clone()));
            }
            template.selectors.validate(&template.id)?;
        }

        Ok(Self {
            templates: file.templates,
            generic: file.generic.selectors,
            generic_delay: Duration::from_millis(file.generic.base_delay_ms),
        })
    }

    /// First template matching the domain, in registry order
    pub fn match_domain(&self, domain: &str) -> Option<&SiteTemplate> {
        self.templates.iter().find(|t| t.matches(domain))
    }

    /// Look up a template by id
    pub fn get(&self, id: &str) -> Option<&SiteTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Selector set for a template id; unknown ids get the generic set
    pub fn selectors(&self, id: Option<&str>) -> &SelectorSet {
        id.and_then(|id| self.get(id))
            .map(|t| &t.selectors)
            .unwrap_or(&self.generic)
    }

    pub fn generic(&self) -> &SelectorSet {
        &self.generic
    }

    /// Politeness delay for unknown domains
    pub fn generic_delay(&self) -> Duration {
        self.generic_delay
    }

    pub fn templates(&self) -> &[SiteTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [generic.selectors]
        title = ["h1"]
        body = ["p"]
    "#;

    #[test]
    fn test_load_embedded_registry() {
        let registry = SiteRegistry::load_embedded().unwrap();
        assert!(registry.len() >= 7);
        assert!(registry.get("bbc").is_some());
        assert_eq!(registry.generic_delay(), Duration::from_millis(5000));
    }

    #[test]
    fn test_suffix_match_on_label_boundary() {
        assert!(domain_matches("bbc.com", "bbc.com"));
        assert!(domain_matches("news.bbc.co.uk", "bbc.co.uk"));
        assert!(!domain_matches("notbbc.com", "bbc.com"));
        assert!(!domain_matches("bbc.com.evil.net", "bbc.com"));
    }

    #[test]
    fn test_first_match_wins() {
        let registry = SiteRegistry::from_toml_str(
            "inline",
            r#"
            [generic.selectors]
            title = ["h1"]
            body = ["p"]

            [[templates]]
            id = "first"
            domains = ["example.com"]
            base_delay_ms = 100
            [templates.selectors]
            title = ["h1"]
            body = ["p"]

            [[templates]]
            id = "second"
            domains = ["news.example.com"]
            base_delay_ms = 200
            [templates.selectors]
            title = ["h2"]
            body = ["div"]
            "#,
        )
        .unwrap();

        assert_eq!(registry.match_domain("news.example.com").unwrap().id, "first");
        assert!(registry.match_domain("example.org").is_none());
    }

    #[test]
    fn test_minimal_registry_defaults_generic_delay() {
        let registry = SiteRegistry::from_toml_str("inline", MINIMAL).unwrap();
        assert!(registry.is_empty());
        assert_eq!(
            registry.generic_delay(),
            Duration::from_millis(DEFAULT_GENERIC_DELAY_MS)
        );
        assert_eq!(registry.selectors(Some("missing")), registry.generic());
    }

    #[test]
    fn test_invalid_selector_is_configuration_error() {
        let err = SiteRegistry::from_toml_str(
            "inline",
            r#"
            [generic.selectors]
            title = ["h1[[["]
            body = ["p"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector { field: "title", .. }));
    }

    #[test]
    fn test_duplicate_and_reserved_ids_rejected() {
        let template = |id: &str| {
            format!(
                "[[templates]]\nid = \"{id}\"\ndomains = [\"a.com\"]\nbase_delay_ms = 1\n[templates.selectors]\ntitle = [\"h1\"]\nbody = [\"p\"]\n"
            )
        };

        let dup = format!("{MINIMAL}\n{}\n{}", template("x"), template("x"));
        assert!(matches!(
            SiteRegistry::from_toml_str("inline", &dup).unwrap_err(),
            ConfigError::DuplicateTemplate(_)
        ));

        let reserved = format!("{MINIMAL}\n{}", template("generic"));
        assert!(matches!(
            SiteRegistry::from_toml_str("inline", &reserved).unwrap_err(),
            ConfigError::ReservedTemplate(_)
        ));
    }

    #[test]
    fn test_empty_domains_rejected() {
        let doc = format!(
            "{MINIMAL}\n[[templates]]\nid = \"x\"\ndomains = []\nbase_delay_ms = 1\n[templates.selectors]\ntitle = [\"h1\"]\nbody = [\"p\"]\n"
        );
        assert!(matches!(
            SiteRegistry::from_toml_str("inline", &doc).unwrap_err(),
            ConfigError::EmptyDomains(_)
        ));
    }

    #[test]
    fn test_missing_generic_section_rejected() {
        assert!(matches!(
            SiteRegistry::from_toml_str("inline", "templates = []").unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
