//! Pressroom Runtime
//!
//! Ties the engine together:
//! - **Orchestrator**: resolve profile, check backoff, fetch, classify,
//!   extract, for one URL at a time under global and per-domain limits
//! - **Rendering selector**: static vs. scripted fetches, learned per site
//! - **Batch runner**: many URLs with rescheduling and a summary report

pub mod batch;
pub mod orchestrator;
pub mod render;

pub use batch::*;
pub use orchestrator::*;
pub use render::*;
