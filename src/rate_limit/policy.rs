use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderName;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_REQUESTS_PER_MINUTE: f64 = 60.0;
pub const DEFAULT_BURST_SIZE: u32 = 10;
pub const DEFAULT_SKIP_PATHS: &[&str] = &["/healthz"];

/// Key used when the request carries no peer address.
pub const UNKNOWN_KEY: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("requests_per_minute must be a positive finite number, got {0}")]
    InvalidRate(f64),
    #[error("burst_size must be greater than zero")]
    ZeroBurst,
}

/// Caller-supplied key derivation.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// How a request is mapped to the key its bucket is tracked under.
#[derive(Clone, Default)]
pub enum KeyExtractor {
    /// Peer IP address without the port.
    #[default]
    PeerIp,
    /// Full peer socket address, `ip:port`.
    PeerAddr,
    /// First comma-separated value of a header, e.g. `x-forwarded-for`.
    /// Falls back to the peer IP when the header is missing or empty.
    Header(HeaderName),
    Custom(KeyFn),
}

impl KeyExtractor {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn extract(&self, request: &Request) -> String {
        match self {
            Self::PeerIp => peer_addr(request)
                .map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
            Self::PeerAddr => peer_addr(request)
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| UNKNOWN_KEY.to_string()),
            Self::Header(name) => request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Self::PeerIp.extract(request)),
            Self::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerIp => f.write_str("PeerIp"),
            Self::PeerAddr => f.write_str("PeerAddr"),
            Self::Header(name) => f.debug_tuple("Header").field(name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Immutable rate limit settings shared by the limiter and its middleware.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    requests_per_minute: f64,
    burst_size: u32,
    key_extractor: KeyExtractor,
    skip_paths: HashSet<String>,
}

impl RateLimitPolicy {
    /// Validated policy with the default key extractor and skip paths.
    pub fn new(requests_per_minute: f64, burst_size: u32) -> Result<Self, PolicyError> {
        if !requests_per_minute.is_finite() || requests_per_minute <= 0.0 {
            return Err(PolicyError::InvalidRate(requests_per_minute));
        }
        if burst_size == 0 {
            return Err(PolicyError::ZeroBurst);
        }

        Ok(Self {
            requests_per_minute,
            burst_size,
            key_extractor: KeyExtractor::default(),
            skip_paths: DEFAULT_SKIP_PATHS.iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn with_key_extractor(mut self, key_extractor: KeyExtractor) -> Self {
        self.key_extractor = key_extractor;
        self
    }

    /// Replace the exempt path set.
    pub fn with_skip_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn requests_per_minute(&self) -> f64 {
        self.requests_per_minute
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    /// Bucket capacity as used by the refill math.
    pub fn capacity(&self) -> f64 {
        f64::from(self.burst_size)
    }

    pub fn key_extractor(&self) -> &KeyExtractor {
        &self.key_extractor
    }

    pub fn skip_paths(&self) -> &HashSet<String> {
        &self.skip_paths
    }

    pub fn is_skipped(&self, path: &str) -> bool {
        self.skip_paths.contains(path)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            burst_size: DEFAULT_BURST_SIZE,
            key_extractor: KeyExtractor::default(),
            skip_paths: DEFAULT_SKIP_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}
