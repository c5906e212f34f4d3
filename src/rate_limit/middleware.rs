use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use super::limiter::RateLimiter;
use crate::error::ApiError;
use crate::metrics::METRICS;

/// Axum middleware enforcing the limiter's policy.
///
/// Exempt paths go straight to the next handler without touching the limiter.
/// Everything else is keyed by the policy's extractor; a denied request gets a
/// 429 and never reaches the handler.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let policy = limiter.policy();
    if policy.is_skipped(request.uri().path()) {
        return next.run(request).await;
    }

    let key = policy.key_extractor().extract(&request);
    if limiter.allow(&key) {
        return next.run(request).await;
    }

    debug!(key = %key, path = %request.uri().path(), "Rate limit exceeded");
    METRICS.rate_limit_exceeded_total.inc();
    ApiError::RateLimitExceeded.into_response()
}

/// Periodically drop buckets idle for at least `max_idle`.
///
/// Runs until the returned task is aborted or the runtime shuts down.
pub fn spawn_idle_eviction(limiter: Arc<RateLimiter>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 2).max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = limiter.evict_idle(max_idle);
            let remaining = limiter.len();
            METRICS.rate_limit_buckets.set(remaining as f64);
            if evicted > 0 {
                debug!(evicted, remaining, "Evicted idle rate limit buckets");
            }
        }
    })
}
