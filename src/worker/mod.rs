//! Background worker: the caching request router and its control
//! protocol.
//!
//! The router intercepts same-origin GET traffic, applies a per-route
//! caching strategy, owns the versioned cache generation lifecycle, and
//! synthesizes offline responses when both cache and network fail.

pub mod cache;
pub mod fetch;
pub mod messages;
pub mod router;

pub use cache::{CacheNames, ResponseCache};
pub use fetch::{Fetch, HttpFetcher, Request, Response};
pub use router::{CacheRouter, Lifecycle, RouterConfig};
