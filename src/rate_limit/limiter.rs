use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use super::bucket::TokenBucket;
use super::policy::RateLimitPolicy;
use crate::clock::{Clock, MonotonicClock};

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Per-key token bucket limiter.
///
/// The key map sits behind a read/write lock that is only held for lookup and
/// insertion. Each bucket has its own mutex, so decisions for different keys
/// never wait on each other and decisions for the same key are serialized.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, SharedBucket>>,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, Arc::new(MonotonicClock))
    }

    pub fn with_clock(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admit or reject one request for `key`, creating its bucket on first use.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = self.bucket_for(key);
        let mut bucket = lock_bucket(&bucket);
        // Sampled under the bucket lock so same-key updates see ordered timestamps.
        let now = self.clock.now();
        bucket.try_consume(now, self.policy.requests_per_minute(), self.policy.capacity())
    }

    fn bucket_for(&self, key: &str) -> SharedBucket {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(key) {
                return Arc::clone(bucket);
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have inserted the key between the two locks.
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TokenBucket::full(
                self.policy.capacity(),
                self.clock.now(),
            )))
        });
        Arc::clone(bucket)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Token count for `key` as of its last decision, without refilling.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        let bucket = {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(buckets.get(key)?)
        };
        let tokens = lock_bucket(&bucket).tokens();
        Some(tokens)
    }

    /// Drop buckets that have not been touched for at least `max_idle`.
    ///
    /// Buckets currently held by an in-flight decision are kept. Returns the
    /// number of buckets removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();

        // Handles are only cloned under the read lock, so a strong count of one
        // means no caller can be mid-decision on this bucket.
        buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let last_update = lock_bucket(bucket).last_update();
            now.saturating_duration_since(last_update) < max_idle
        });

        before - buckets.len()
    }
}

// Bucket state is a pair of plain values updated without any fallible step in
// between, so a poisoned lock still guards a consistent bucket.
fn lock_bucket(bucket: &Mutex<TokenBucket>) -> MutexGuard<'_, TokenBucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}
