//! Engine configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no
//! file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration problems, reported at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Template '{template}' has invalid {field} selector '{selector}'")]
    InvalidSelector {
        template: String,
        field: &'static str,
        selector: String,
    },

    #[error("Template '{0}' lists no domains")]
    EmptyDomains(String),

    #[error("Template id '{0}' is declared more than once")]
    DuplicateTemplate(String),

    #[error("Template id '{0}' is reserved")]
    ReservedTemplate(String),

    #[error("Template '{template}' needs at least one {field} selector")]
    MissingSelectors {
        template: String,
        field: &'static str,
    },

    #[error("Invalid setting {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn parse(origin: impl Into<String>, source: toml::de::Error) -> Self {
        ConfigError::Parse {
            origin: origin.into(),
            source,
        }
    }
}

/// Read a file, wrapping IO errors with the path
pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Backoff scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Upper bound on any computed delay
    pub max_delay_secs: u64,
    /// Jitter ratio; delays are scaled by a factor in [1 - j, 1 + j]
    pub jitter: f64,
    /// Consecutive block/challenge failures that put a domain in cooldown
    pub cooldown_threshold: u32,
    /// Automatic cooldown expiry; `None` means operator reset only
    pub cooldown_secs: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay_secs: 300,
            jitter: 0.2,
            cooldown_threshold: 5,
            cooldown_secs: None,
        }
    }
}

impl BackoffConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn cooldown_duration(&self) -> Option<Duration> {
        self.cooldown_secs.map(Duration::from_secs)
    }

    /// No jitter, for deterministic schedules
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

/// Defense signal detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Bodies shorter than this are truncated or empty
    pub min_body_bytes: usize,
    /// Pages with less visible text than this are suspiciously empty
    pub min_visible_chars: usize,
    /// Only this much of the body is scanned for fingerprints
    pub scan_limit_bytes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_body_bytes: 256,
            min_visible_chars: 100,
            scan_limit_bytes: 64 * 1024,
        }
    }
}

/// Extraction chain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum body length for a structural or semantic success
    pub min_content_chars: usize,
    /// Low-confidence results at or above this are still published
    pub publish_threshold: f64,
    /// Cap on tags attached to an article
    pub max_tags: usize,
    /// Keyword vocabulary matched against body text
    pub tag_vocabulary: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 200,
            publish_threshold: crate::DEFAULT_PUBLISH_THRESHOLD,
            max_tags: crate::text::MAX_TAGS,
            tag_vocabulary: crate::text::DEFAULT_TAG_VOCABULARY
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Optional proxy URL (http, https or socks5)
    pub proxy: Option<String>,
    /// Remote rendering service used for scripted fetches
    pub render_endpoint: Option<String>,
    /// How long the rendering service waits after load
    pub render_wait_ms: u64,
    /// Redirect limit
    pub max_redirects: usize,
    /// Fixed user agent; rotates through real browser agents when unset
    pub user_agent: Option<String>,
    /// Response bodies are cut off past this size
    pub max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            proxy: None,
            render_endpoint: None,
            render_wait_ms: 2000,
            max_redirects: 8,
            user_agent: None,
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Global cap on in-flight URLs
    pub max_concurrent: usize,
    /// Hard timeout for one fetch attempt
    pub attempt_timeout_secs: u64,
    /// How long a resolved profile stays cached; `None` keeps it for the process lifetime
    pub profile_ttl_secs: Option<u64>,
    /// How long a probed rendering mode is trusted; `None` trusts it forever
    pub render_hint_ttl_secs: Option<u64>,
    /// Visible text below this, together with a framework marker, means a client-rendered shell
    pub shell_text_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            attempt_timeout_secs: 45,
            profile_ttl_secs: None,
            render_hint_ttl_secs: Some(6 * 60 * 60),
            shell_text_threshold: 200,
        }
    }
}

impl RuntimeConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn profile_ttl(&self) -> Option<Duration> {
        self.profile_ttl_secs.map(Duration::from_secs)
    }

    pub fn render_hint_ttl(&self) -> Option<Duration> {
        self.render_hint_ttl_secs.map(Duration::from_secs)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: BackoffConfig,
    pub detector: DetectorConfig,
    pub extraction: ExtractionConfig,
    pub transport: TransportConfig,
    pub runtime: RuntimeConfig,
    /// Site registry file; the embedded registry is used when unset
    pub sites_path: Option<PathBuf>,
    /// Defense fingerprint file; the embedded list is used when unset
    pub fingerprints_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(origin: &str, content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::parse(origin, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        Self::from_toml_str(&path.display().to_string(), &content)
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.scheduler.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.jitter",
                reason: format!("{} is outside [0, 1)", self.scheduler.jitter),
            });
        }
        if self.scheduler.cooldown_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.cooldown_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scheduler.max_delay_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.max_delay_secs",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.extraction.publish_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "extraction.publish_threshold",
                reason: format!("{} is outside [0, 1]", self.extraction.publish_threshold),
            });
        }
        if self.runtime.max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "runtime.max_concurrent",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.transport.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "transport.max_body_bytes",
                reason: "must be positive".to_string(),
            });
        }
        if self.runtime.attempt_timeout_secs == 0 || self.transport.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout",
                reason: "timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("inline", "").unwrap();
        assert_eq!(config.scheduler.cooldown_threshold, 5);
        assert_eq!(config.runtime.max_concurrent, 8);
        assert!(config.sites_path.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_toml_str(
            "inline",
            r#"
            [scheduler]
            jitter = 0.0
            cooldown_secs = 600

            [extraction]
            publish_threshold = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.jitter, 0.0);
        assert_eq!(config.scheduler.cooldown_duration(), Some(Duration::from_secs(600)));
        assert_eq!(config.scheduler.max_delay_secs, 300);
        assert_eq!(config.extraction.publish_threshold, 0.7);
        assert!(!config.extraction.tag_vocabulary.is_empty());
    }

    #[test]
    fn test_rejects_bad_jitter() {
        let err = EngineConfig::from_toml_str("inline", "[scheduler]\njitter = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "scheduler.jitter", .. }));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = EngineConfig::from_toml_str("inline", "[scheduler\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
