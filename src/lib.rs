pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod user;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use rate_limit::{KeyExtractor, RateLimitPolicy, RateLimiter, TokenBucket};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
