//! Pressroom Network Layer
//!
//! Provides the fetch side of the engine:
//! - `Transport` trait with typed, signal-mapped errors
//! - reqwest transport with an optional remote rendering service
//! - Browser header sets with user agent rotation

pub mod headers;
pub mod http;
pub mod transport;

pub use headers::*;
pub use http::*;
pub use transport::*;
