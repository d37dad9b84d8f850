//! Redis storage backend for `sluice` (companion crate).
//!
//! Bring your own connection, or let [`RedisStore::connect`] open one. Each
//! decision is a single Lua script round trip that reads the bucket hash,
//! runs the algorithm step, writes the new state, and refreshes the key's
//! TTL, all server-side, so two concurrent callers can never both act on
//! the same pre-update state. That one-round-trip rule is what makes the
//! limit hold across independent processes.
//!
//! Keys expire after an inactivity window (default one hour); idle buckets
//! reclaim themselves without a cleanup job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;

use sluice::{Algorithm, BucketStore, LimiterConfig, RateLimitError, RateLimitResult};

/// Seconds of inactivity before a bucket's key expires.
const DEFAULT_TTL_SECS: u64 = 3600;
/// Namespace every key lives under unless overridden.
const DEFAULT_KEY_PREFIX: &str = "sluice";

// Reply shape for both scripts: {allowed, floor(remaining), retry_after}.
// `retry_after` crosses the wire as a string because Redis truncates Lua
// numbers to integers in replies; it is empty when the request is allowed.
const TOKEN_BUCKET_SCRIPT: &str = r"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'level', 'last_update')
local level = tonumber(bucket[1])
local last_update = tonumber(bucket[2])
if level == nil then
    level = capacity
    last_update = now
end

local elapsed = math.max(0, now - last_update)
level = math.min(capacity, level + elapsed * rate)

local allowed = 0
local retry_after = ''
if level >= 1 then
    level = level - 1
    allowed = 1
else
    retry_after = tostring((1 - level) / rate)
end

redis.call('HSET', key, 'level', tostring(level), 'last_update', tostring(now))
redis.call('EXPIRE', key, ttl)
return {allowed, tostring(math.floor(level)), retry_after}
";

const LEAKY_BUCKET_SCRIPT: &str = r"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'level', 'last_update')
local level = tonumber(bucket[1])
local last_update = tonumber(bucket[2])
if level == nil then
    level = 0
    last_update = now
end

local elapsed = math.max(0, now - last_update)
level = math.max(0, level - elapsed * rate)

local allowed = 0
local remaining = 0
local retry_after = ''
if level < capacity then
    level = level + 1
    allowed = 1
    -- A fractionally drained level can exceed capacity after admission
    -- (e.g. 4.5 + 1 against capacity 5); headroom must not go negative.
    remaining = math.max(0, math.floor(capacity - level))
else
    retry_after = tostring((level - capacity + 1) / rate)
end

redis.call('HSET', key, 'level', tostring(level), 'last_update', tostring(now))
redis.call('EXPIRE', key, ttl)
return {allowed, tostring(remaining), retry_after}
";

/// Rejected key prefix (empty after normalization, or control characters).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid key prefix: {0}")]
pub struct InvalidPrefix(&'static str);

#[derive(Debug, thiserror::Error)]
#[error("redis round trip exceeded {limit:?}")]
struct RoundTripTimeout {
    limit: Duration,
}

/// [`BucketStore`] over a shared Redis instance.
///
/// Keys are written as `<prefix>:<algorithm>:<caller key>` so limiters with
/// different algorithms or namespaces never collide.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
    timeout: Option<Duration>,
    token_bucket: Arc<Script>,
    leaky_bucket: Arc<Script>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("ttl_secs", &self.ttl_secs)
            .field("timeout", &self.timeout)
            .field("conn", &"<redis::ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Create a store using an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            timeout: None,
            token_bucket: Arc::new(Script::new(TOKEN_BUCKET_SCRIPT)),
            leaky_bucket: Arc::new(Script::new(LEAKY_BUCKET_SCRIPT)),
        }
    }

    /// Open a connection to `url` (e.g. `redis://127.0.0.1:6379`) and build
    /// a store over it.
    ///
    /// # Errors
    /// Returns [`RateLimitError::Backend`] if the URL is malformed or the
    /// server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url).map_err(RateLimitError::backend)?;
        let conn = ConnectionManager::new(client).await.map_err(RateLimitError::backend)?;
        Ok(Self::new(conn))
    }

    /// Replace the key namespace.
    ///
    /// # Errors
    /// Returns `Err` if the prefix is empty after trimming or contains
    /// control characters.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Result<Self, InvalidPrefix> {
        self.prefix = normalize_prefix(&prefix.into())?;
        Ok(self)
    }

    /// Replace the inactivity window after which idle keys expire.
    ///
    /// A denied request's suggested `retry_after` can exceed this window;
    /// in that case the key expires first and the retry lands on a fresh
    /// bucket, succeeding no later than promised.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        // EXPIRE with 0 deletes the key outright.
        self.ttl_secs = ttl.as_secs().max(1);
        self
    }

    /// Bound each round trip; expiry surfaces as a backend error, never as
    /// an allow or deny.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn full_key(&self, algorithm: Algorithm, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, algorithm.key_prefix(), key)
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn apply(
        &self,
        key: &str,
        algorithm: Algorithm,
        config: LimiterConfig,
        now: f64,
    ) -> Result<RateLimitResult, RateLimitError> {
        let script = match algorithm {
            Algorithm::TokenBucket => &self.token_bucket,
            Algorithm::LeakyBucket => &self.leaky_bucket,
        };
        let full_key = self.full_key(algorithm, key);
        let mut conn = self.conn.clone();

        let mut invocation = script.prepare_invoke();
        invocation
            .key(&full_key)
            .arg(config.capacity())
            .arg(config.rate())
            .arg(now)
            .arg(self.ttl_secs);

        let round_trip = invocation.invoke_async(&mut conn);
        let reply: (i64, i64, String) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, round_trip).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(key = %full_key, ?limit, "redis round trip timed out");
                    return Err(RateLimitError::backend(RoundTripTimeout { limit }));
                }
            },
            None => round_trip.await,
        }
        .map_err(|e| {
            warn!(key = %full_key, error = %e, "redis rate limit script failed");
            RateLimitError::backend(e)
        })?;

        decision_from_reply(reply)
    }

    async fn reset(&self, key: &str, algorithm: Algorithm) -> Result<(), RateLimitError> {
        let full_key = self.full_key(algorithm, key);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %full_key, error = %e, "redis reset failed");
                RateLimitError::backend(e)
            })?;
        Ok(())
    }
}

// The script has already committed its write by the time the reply is
// decoded, so decoding must stay total for every value the scripts can
// produce: a negative remaining is clamped, never treated as a backend
// failure.
fn decision_from_reply(
    (allowed, remaining, retry_after): (i64, i64, String),
) -> Result<RateLimitResult, RateLimitError> {
    let allowed = allowed == 1;
    let retry_after = if allowed || retry_after.is_empty() {
        None
    } else {
        let secs: f64 = retry_after.parse().map_err(RateLimitError::backend)?;
        Some(if secs.is_finite() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            Duration::MAX
        })
    };

    Ok(RateLimitResult { allowed, remaining: remaining.max(0) as u64, retry_after })
}

fn normalize_prefix(prefix: &str) -> Result<String, InvalidPrefix> {
    let normalized = prefix.trim().trim_end_matches(':');
    if normalized.is_empty() {
        return Err(InvalidPrefix("prefix cannot be empty"));
    }
    if normalized.chars().any(|c| c.is_control()) {
        return Err(InvalidPrefix("prefix cannot contain control characters"));
    }
    Ok(normalized.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefix_trims_and_strips_separators() {
        assert_eq!(normalize_prefix("  ratelimit: ").unwrap(), "ratelimit");
        assert_eq!(normalize_prefix("app").unwrap(), "app");
    }

    #[test]
    fn normalize_prefix_rejects_empty_and_control_chars() {
        assert!(normalize_prefix("").is_err());
        assert!(normalize_prefix("  :: ").is_err());
        assert!(normalize_prefix("bad\nprefix").is_err());
    }

    #[test]
    fn scripts_write_state_and_refresh_expiry() {
        // Both scripts must persist the hash and refresh the TTL on every
        // call, admitted or denied.
        for script in [TOKEN_BUCKET_SCRIPT, LEAKY_BUCKET_SCRIPT] {
            assert!(script.contains("HSET"));
            assert!(script.contains("EXPIRE"));
            assert!(script.contains("math.max(0, now - last_update)"));
        }
        // Seed states differ: token buckets start full, leaky buckets empty.
        assert!(TOKEN_BUCKET_SCRIPT.contains("level = capacity"));
        assert!(LEAKY_BUCKET_SCRIPT.contains("level = 0"));
    }

    #[test]
    fn leaky_script_clamps_headroom_at_zero() {
        // Admitting onto a fractionally drained level (4.5 + 1 against
        // capacity 5) makes capacity - level negative; the script must
        // report zero headroom, not -1.
        assert!(LEAKY_BUCKET_SCRIPT.contains("math.max(0, math.floor(capacity - level))"));
    }

    #[test]
    fn negative_remaining_decodes_as_zero_not_an_error() {
        // An admission committed server-side must decode no matter what
        // the remaining slot holds.
        let result = decision_from_reply((1, -1, String::new())).expect("decodes");
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.retry_after, None);
    }

    #[test]
    fn reply_decodes_admissions_and_denials() {
        let admitted = decision_from_reply((1, 4, String::new())).unwrap();
        assert!(admitted.allowed);
        assert_eq!(admitted.remaining, 4);
        assert_eq!(admitted.retry_after, None);

        let denied = decision_from_reply((0, 0, "0.5".to_string())).unwrap();
        assert!(!denied.allowed);
        let retry = denied.retry_after.expect("denials carry retry_after");
        assert!((retry.as_secs_f64() - 0.5).abs() < 1e-9);

        // Lua's tostring(1/0) crosses the wire as "inf".
        let stalled = decision_from_reply((0, 0, "inf".to_string())).unwrap();
        assert_eq!(stalled.retry_after, Some(Duration::MAX));
    }
}
