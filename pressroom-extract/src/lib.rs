//! Pressroom Extraction
//!
//! Strategies that turn a parsed page into an article record:
//! - **Structural**: registered selector sets for known site templates
//! - **Semantic**: text-density scoring of block containers
//! - **Generic**: largest text block, the last resort
//!
//! [`ExtractionChain`] runs them in that order, keeps the best partial
//! result and applies cleanup, metadata fallbacks and tagging to the winner.

pub mod chain;
pub mod dom;
pub mod generic;
pub mod semantic;
pub mod structural;
pub mod traits;

pub use chain::*;
pub use generic::*;
pub use semantic::*;
pub use structural::*;
pub use traits::*;
