#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Sluice
//!
//! Keyed rate limiting for async Rust: grant or deny individual requests
//! against a per-key quota.
//!
//! ## Features
//!
//! - **Two algorithms**: token bucket (credit that refills) and leaky bucket
//!   (queue that drains), both computed lazily from elapsed time
//! - **Pluggable storage**: in-memory out of the box; Redis via the
//!   companion `sluice-redis` crate for limits shared across processes
//! - **Per-key linearizability**: concurrent callers on the same key always
//!   observe a single consistent decision sequence
//! - **Injectable clock** so tests can drive arbitrary timelines
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice::RateLimiter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice::RateLimitError> {
//!     // 10-request burst, refilling at 2 tokens per second.
//!     let limiter = RateLimiter::token_bucket(10, 2.0)?;
//!
//!     let decision = limiter.allow_request("client-42").await?;
//!     assert!(decision.allowed);
//!     assert_eq!(decision.remaining, 9);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The system is designed to be modular:
//! - **Algorithm**: [`Algorithm`] is a pure state transition: `(previous
//!   state, now) -> (new state, decision)`. No timers, no background refill.
//! - **Storage**: [`BucketStore`] owns the per-key state and the atomicity
//!   of the load-compute-store sequence, in process ([`MemoryStore`]) or in
//!   a shared remote store.
//! - **Facade**: [`RateLimiter`] binds one algorithm, one validated
//!   configuration, and one store behind `allow_request`.

pub mod algorithm;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod state;
pub mod store;

// Re-exports
pub use algorithm::{Algorithm, StepOutcome};
pub use clock::{Clock, SystemClock};
pub use error::RateLimitError;
pub use limiter::{LimiterConfig, RateLimitResult, RateLimiter};
pub use state::BucketState;
pub use store::{BucketStore, MemoryStore};
