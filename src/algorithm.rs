//! Rate-shaping algorithms as pure state transitions.
//!
//! Both algorithms are lazy: nothing ticks in the background. Refill and
//! drain are recomputed from elapsed time on every call, which makes the
//! math trivially testable by injecting arbitrary `now` values and lets the
//! same step run inside any store's atomic-apply discipline.

use std::time::Duration;

use crate::limiter::RateLimitResult;
use crate::state::BucketState;

/// Which rate-shaping algorithm a limiter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Credit balance that refills continuously up to `capacity`; each
    /// admitted request consumes one unit.
    TokenBucket,
    /// Queue that drains continuously at `rate`; each admitted request
    /// occupies one slot until it leaks out.
    LeakyBucket,
}

/// Result of one algorithm step: the state to persist plus the decision.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// New per-key state, reflecting elapsed-time catch-up to `now` whether
    /// or not the request was admitted.
    pub state: BucketState,
    /// The decision handed back to the caller.
    pub result: RateLimitResult,
}

impl Algorithm {
    /// Key namespace prefix, so token and leaky buckets for the same caller
    /// key never share a record.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "tb",
            Algorithm::LeakyBucket => "lb",
        }
    }

    /// State for a key seen for the first time: token buckets start full,
    /// leaky buckets start empty.
    pub fn seed(&self, capacity: u64, now: f64) -> BucketState {
        match self {
            Algorithm::TokenBucket => BucketState::new(capacity as f64, now),
            Algorithm::LeakyBucket => BucketState::new(0.0, now),
        }
    }

    /// Advance one bucket to `now` and decide a single request.
    ///
    /// Pure: no clocks, no storage. Stores call this inside their atomic
    /// apply. `state = None` means the key has never been seen and is
    /// seeded per [`Algorithm::seed`].
    ///
    /// Total for degenerate inputs even though [`crate::LimiterConfig`]
    /// rejects them: `capacity = 0` denies everything, `rate = 0` never
    /// refills or drains (retry estimates that come out non-finite clamp to
    /// `Duration::MAX`).
    pub fn step(
        &self,
        state: Option<BucketState>,
        now: f64,
        capacity: u64,
        rate: f64,
    ) -> StepOutcome {
        let state = state.unwrap_or_else(|| self.seed(capacity, now));
        // Clamp: a backwards clock step must not drain credit or mint it.
        let elapsed = (now - state.last_update).max(0.0);
        let capacity = capacity as f64;

        match self {
            Algorithm::TokenBucket => {
                let tokens = (state.level + elapsed * rate).min(capacity);
                if tokens >= 1.0 {
                    let level = tokens - 1.0;
                    StepOutcome {
                        state: BucketState::new(level, now),
                        result: RateLimitResult {
                            allowed: true,
                            remaining: level.floor() as u64,
                            retry_after: None,
                        },
                    }
                } else {
                    // Denial still persists refill progress: no token is
                    // lost, none accrue from the denial itself.
                    StepOutcome {
                        state: BucketState::new(tokens, now),
                        result: RateLimitResult {
                            allowed: false,
                            remaining: tokens.floor() as u64,
                            retry_after: Some(secs_to_duration((1.0 - tokens) / rate)),
                        },
                    }
                }
            }
            Algorithm::LeakyBucket => {
                let level = (state.level - elapsed * rate).max(0.0);
                if level < capacity {
                    let level = level + 1.0;
                    // Admitting onto a fractionally drained level can push
                    // it past capacity; headroom must not go negative.
                    StepOutcome {
                        state: BucketState::new(level, now),
                        result: RateLimitResult {
                            allowed: true,
                            remaining: (capacity - level).max(0.0).floor() as u64,
                            retry_after: None,
                        },
                    }
                } else {
                    StepOutcome {
                        state: BucketState::new(level, now),
                        result: RateLimitResult {
                            allowed: false,
                            remaining: 0,
                            retry_after: Some(secs_to_duration((level - capacity + 1.0) / rate)),
                        },
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::TokenBucket => write!(f, "token_bucket"),
            Algorithm::LeakyBucket => write!(f, "leaky_bucket"),
        }
    }
}

// `Duration::from_secs_f64` panics on non-finite input (rate = 0 yields inf).
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() {
        Duration::from_secs_f64(secs.max(0.0))
    } else {
        Duration::MAX
    }
}
