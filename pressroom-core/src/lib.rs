//! Pressroom Core - Domain model and per-domain decision state
//!
//! This crate provides the pieces that need no network access:
//! - Site registry and profile resolution (known template vs. generic)
//! - Defense signal detection over raw fetch attempts
//! - Per-domain backoff scheduling with cooldown
//! - Article records, extraction outcomes and text cleanup
//! - Engine configuration and injectable clocks

pub mod article;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod defense;
pub mod fetch;
pub mod profile;
pub mod sites;
pub mod text;

pub use article::*;
pub use backoff::*;
pub use clock::*;
pub use config::*;
pub use defense::*;
pub use fetch::*;
pub use profile::*;
pub use sites::*;

/// Minimum confidence for a low-confidence article to be published
pub const DEFAULT_PUBLISH_THRESHOLD: f64 = 0.5;

/// Default language tag for extracted articles
pub const DEFAULT_LANGUAGE: &str = "en";
