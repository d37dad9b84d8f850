//! Error types for rate limiting.

/// Unified error type for limiter construction and decision calls.
///
/// Backend unavailability is deliberately distinct from a denial: the
/// engine never converts a connection failure into an allow or a deny, so
/// the caller can pick its own fallback policy (fail-open, fail-closed,
/// retry).
#[derive(thiserror::Error, Debug)]
pub enum RateLimitError {
    /// Capacity must be at least one.
    #[error("capacity must be > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: u64,
    },
    /// Rate must be a positive, finite number of units per second.
    #[error("rate must be > 0 and finite (got {provided})")]
    InvalidRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// Keys identify buckets; an empty key is always a caller bug.
    #[error("key must not be empty")]
    EmptyKey,
    /// The shared backend could not complete the round trip.
    #[error("backend unavailable: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RateLimitError {
    /// Wrap a store-level failure (connection refused, timeout, script
    /// error) as a backend error.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        RateLimitError::Backend(err.into())
    }

    /// Check if this error is a backend failure rather than a
    /// configuration or argument error.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_value() {
        let msg = RateLimitError::InvalidCapacity { provided: 0 }.to_string();
        assert!(msg.contains("got 0"));
        let msg = RateLimitError::InvalidRate { provided: -1.5 }.to_string();
        assert!(msg.contains("-1.5"));
    }

    #[test]
    fn backend_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = RateLimitError::backend(io);
        assert!(err.is_backend());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("refused"));
    }
}
