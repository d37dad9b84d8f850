//! Clock abstractions used by the rate limiting engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// Returns wall-clock seconds since the Unix epoch, fractional. Wall clock
/// rather than a process-local monotonic source because shared backends
/// compare timestamps written by different processes.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: the system clock can step backwards; the algorithm step clamps
/// negative elapsed time to zero, so a skewed reading stalls refill for one
/// call rather than corrupting the bucket level.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(a > 0.0);
        assert!(b >= a);
    }
}
