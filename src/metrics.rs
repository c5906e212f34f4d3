use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Process-wide Prometheus metrics
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub http_requests_total: CounterVec,

    // Rate limiting metrics
    pub rate_limit_exceeded_total: Counter,
    pub rate_limit_buckets: Gauge,

    // User metrics
    pub users_created_total: Counter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("tollgate_http_requests_total", "Total number of HTTP requests"),
            &["method", "status"],
        )?;

        let rate_limit_exceeded_total = Counter::new(
            "tollgate_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting",
        )?;

        let rate_limit_buckets = Gauge::new(
            "tollgate_rate_limit_buckets",
            "Number of keys currently tracked by the rate limiter",
        )?;

        let users_created_total = Counter::new(
            "tollgate_users_created_total",
            "Total number of users created",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(rate_limit_exceeded_total.clone()))?;
        registry.register(Box::new(rate_limit_buckets.clone()))?;
        registry.register(Box::new(users_created_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            rate_limit_exceeded_total,
            rate_limit_buckets,
            users_created_total,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
