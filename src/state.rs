//! Persisted per-key bucket state.

/// The per-key record a store persists between decisions.
///
/// `level` is tokens available (token bucket) or queued requests (leaky
/// bucket), always within `[0, capacity]`. It is only ever recomputed as a
/// function of `(previous level, previous last_update, now)`, never
/// adjusted without first catching up to `now`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Current quantity.
    pub level: f64,
    /// Wall-clock seconds at which `level` was last recomputed.
    pub last_update: f64,
}

impl BucketState {
    /// Create a state snapshot taken at `last_update`.
    pub fn new(level: f64, last_update: f64) -> Self {
        Self { level, last_update }
    }
}
