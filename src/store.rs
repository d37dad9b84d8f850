//! Storage backends for per-key bucket state.
//!
//! A store owns durability and concurrency control; the algorithm step is
//! pure and runs inside the store's atomic apply. For a fixed key the
//! sequence of `apply` calls is linearizable: each call sees the fully
//! committed state of the previous one, and no two calls can act on the
//! same pre-state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::algorithm::Algorithm;
use crate::error::RateLimitError;
use crate::limiter::{LimiterConfig, RateLimitResult};
use crate::state::BucketState;

/// Abstract storage for bucket state, keyed by caller-supplied identifier.
///
/// Implementations must make `apply` atomic per key: load state, run
/// `algorithm.step`, persist the new state, return the decision, as one
/// indivisible operation relative to other calls on the same key.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically apply one algorithm step for `key` at time `now`
    /// (wall-clock seconds) and return the decision.
    async fn apply(
        &self,
        key: &str,
        algorithm: Algorithm,
        config: LimiterConfig,
        now: f64,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Drop any state held for `key`, returning it to the lazy seed state.
    async fn reset(&self, key: &str, algorithm: Algorithm) -> Result<(), RateLimitError>;
}

/// In-process store over a single mutex-guarded map.
///
/// The coarse lock covers the whole load-compute-store sequence, which is
/// what makes concurrent callers on one key serialize; there are no
/// suspension points while the lock is held. Key count is unbounded; there
/// is no built-in eviction.
#[derive(Default, Clone, Debug)]
pub struct MemoryStore {
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked. Primarily useful for tests.
    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all tracked keys.
    pub fn clear(&self) {
        self.buckets.lock().unwrap().clear();
    }

    fn full_key(algorithm: Algorithm, key: &str) -> String {
        format!("{}:{}", algorithm.key_prefix(), key)
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn apply(
        &self,
        key: &str,
        algorithm: Algorithm,
        config: LimiterConfig,
        now: f64,
    ) -> Result<RateLimitResult, RateLimitError> {
        let full_key = Self::full_key(algorithm, key);
        let mut buckets = self.buckets.lock().unwrap();
        let previous = buckets.get(&full_key).copied();
        let outcome = algorithm.step(previous, now, config.capacity(), config.rate());
        buckets.insert(full_key, outcome.state);
        Ok(outcome.result)
    }

    async fn reset(&self, key: &str, algorithm: Algorithm) -> Result<(), RateLimitError> {
        self.buckets.lock().unwrap().remove(&Self::full_key(algorithm, key));
        Ok(())
    }
}
