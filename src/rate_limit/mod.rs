//! Per-key token bucket admission control.
//!
//! - [`TokenBucket`]: refill-and-consume math for a single key.
//! - [`RateLimiter`]: owns the key → bucket map and answers `allow(key)`.
//! - [`RateLimitPolicy`]: rate, burst, key extraction and exempt paths.
//! - [`middleware::rate_limit`]: axum middleware that turns a denial into a 429.

pub mod bucket;
pub mod limiter;
pub mod middleware;
pub mod policy;

pub use bucket::TokenBucket;
pub use limiter::RateLimiter;
pub use middleware::{rate_limit, spawn_idle_eviction};
pub use policy::{KeyExtractor, KeyFn, PolicyError, RateLimitPolicy};
