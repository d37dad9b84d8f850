//! The rate limiter facade: one algorithm, one configuration, one store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::algorithm::Algorithm;
use crate::clock::{Clock, SystemClock};
use crate::error::RateLimitError;
use crate::store::{BucketStore, MemoryStore};

/// Validated limiter configuration, immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    capacity: u64,
    rate: f64,
}

impl LimiterConfig {
    /// Create a config with validation.
    ///
    /// # Errors
    /// Returns `Err` if `capacity` is zero or `rate` is not a positive,
    /// finite number.
    pub fn new(capacity: u64, rate: f64) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidCapacity { provided: capacity });
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RateLimitError::InvalidRate { provided: rate });
        }
        Ok(Self { capacity, rate })
    }

    /// Maximum burst (token bucket) or queue occupancy (leaky bucket).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill or drain speed in units per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// The decision returned for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Tokens left (token bucket) or capacity headroom (leaky bucket).
    /// Useful for `X-RateLimit-Remaining`-style reporting.
    pub remaining: u64,
    /// How long until a retry would succeed; `Some` only when denied.
    /// Useful for `Retry-After`-style reporting.
    pub retry_after: Option<Duration>,
}

/// Binds one [`Algorithm`] and one [`LimiterConfig`] to a [`BucketStore`].
///
/// Stateless apart from the store, so it is cheap to share: `Clone` it or
/// wrap it in an `Arc` and call from any number of tasks. Every call is a
/// single synchronous decision; no internal retries, no queuing.
#[derive(Debug, Clone)]
pub struct RateLimiter<S = MemoryStore> {
    algorithm: Algorithm,
    config: LimiterConfig,
    store: S,
    clock: Arc<dyn Clock>,
}

impl RateLimiter<MemoryStore> {
    /// Token bucket over in-process state: burst of `capacity`, refilling
    /// at `rate` tokens per second.
    pub fn token_bucket(capacity: u64, rate: f64) -> Result<Self, RateLimitError> {
        Self::new(Algorithm::TokenBucket, capacity, rate, MemoryStore::new())
    }

    /// Leaky bucket over in-process state: queue of `capacity`, draining at
    /// `rate` requests per second.
    pub fn leaky_bucket(capacity: u64, rate: f64) -> Result<Self, RateLimitError> {
        Self::new(Algorithm::LeakyBucket, capacity, rate, MemoryStore::new())
    }
}

impl<S> RateLimiter<S>
where
    S: BucketStore,
{
    /// Create a limiter over an explicit store (e.g. a shared Redis store).
    ///
    /// # Errors
    /// Returns `Err` if the configuration is invalid; the limiter is never
    /// constructed in an invalid state.
    pub fn new(
        algorithm: Algorithm,
        capacity: u64,
        rate: f64,
        store: S,
    ) -> Result<Self, RateLimitError> {
        Ok(Self {
            algorithm,
            config: LimiterConfig::new(capacity, rate)?,
            store,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source. Tests use this to drive arbitrary
    /// timelines instead of sleeping.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether the request identified by `key` may proceed.
    ///
    /// # Errors
    /// [`RateLimitError::EmptyKey`] for an empty key;
    /// [`RateLimitError::Backend`] when a shared store cannot complete the
    /// round trip. A backend failure is never reported as an allow or a
    /// deny.
    pub async fn allow_request(&self, key: &str) -> Result<RateLimitResult, RateLimitError> {
        if key.is_empty() {
            return Err(RateLimitError::EmptyKey);
        }
        let now = self.clock.now_secs();
        trace!(key, algorithm = %self.algorithm, "checking rate limit");

        let result = self.store.apply(key, self.algorithm, self.config, now).await?;
        if !result.allowed {
            debug!(key, retry_after = ?result.retry_after, "rate limit exceeded");
        }
        Ok(result)
    }

    /// Forget any state for `key`; its next request sees a fresh bucket.
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        if key.is_empty() {
            return Err(RateLimitError::EmptyKey);
        }
        self.store.reset(key, self.algorithm).await
    }

    /// The algorithm this limiter runs.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The validated configuration this limiter was built with.
    pub fn config(&self) -> LimiterConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        let err = RateLimiter::token_bucket(0, 1.0).expect_err("zero capacity should be invalid");
        assert!(matches!(err, RateLimitError::InvalidCapacity { provided: 0 }));
    }

    #[test]
    fn rejects_non_positive_or_non_finite_rate() {
        for rate in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let err = RateLimiter::leaky_bucket(5, rate)
                .expect_err("rate should be rejected");
            assert!(matches!(err, RateLimitError::InvalidRate { .. }), "rate {rate} accepted");
        }
    }

    #[tokio::test]
    async fn empty_key_is_rejected_on_both_operations() {
        let limiter = RateLimiter::token_bucket(5, 1.0).unwrap();
        assert!(matches!(limiter.allow_request("").await, Err(RateLimitError::EmptyKey)));
        assert!(matches!(limiter.reset("").await, Err(RateLimitError::EmptyKey)));
    }

    #[tokio::test]
    async fn first_request_is_allowed() {
        let limiter = RateLimiter::token_bucket(10, 2.0).unwrap();
        let result = limiter.allow_request("user1").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 9);
        assert_eq!(result.retry_after, None);
    }

    #[tokio::test]
    async fn reset_restores_the_burst() {
        let limiter = RateLimiter::token_bucket(1, 0.001).unwrap();
        assert!(limiter.allow_request("user1").await.unwrap().allowed);
        assert!(!limiter.allow_request("user1").await.unwrap().allowed);

        limiter.reset("user1").await.unwrap();
        assert!(limiter.allow_request("user1").await.unwrap().allowed);
    }

    #[test]
    fn config_accessors_round_trip() {
        let limiter = RateLimiter::leaky_bucket(5, 2.0).unwrap();
        assert_eq!(limiter.algorithm(), Algorithm::LeakyBucket);
        assert_eq!(limiter.config().capacity(), 5);
        assert!((limiter.config().rate() - 2.0).abs() < f64::EPSILON);
    }
}
