use crate::error::AppError;
use dashmap::DashMap;
use std::time::Instant;

/// Token bucket parameters for one kind of request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    pub capacity: u32,
    /// Tokens per second.
    pub refill_rate: f64,
}

/// Bid placement, keyed per bidder.
pub const BID_LIMIT: Limit = Limit {
    capacity: 10,
    refill_rate: 1.0,
};

/// WebSocket upgrades, keyed per peer.
pub const WS_CONNECT_LIMIT: Limit = Limit {
    capacity: 10,
    refill_rate: 0.5,
};

/// Auction creation, keyed per seller.
pub const CREATE_LIMIT: Limit = Limit {
    capacity: 5,
    refill_rate: 0.1,
};

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(limit: Limit) -> Self {
        Self {
            capacity: limit.capacity,
            tokens: limit.capacity as f64,
            refill_rate: limit.refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, tokens: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(
            self.capacity as f64,
            self.tokens + elapsed * self.refill_rate,
        );
        self.last_update = now;

        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }

    /// Refilled to capacity, so forgetting it changes nothing.
    fn is_idle(&self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.capacity as f64
    }
}

#[derive(Default)]
pub struct RateLimiter {
    // "<scope>:<key>" -> bucket
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, scope: &str, key: &str, limit: Limit) -> Result<(), AppError> {
        let bucket_key = format!("{}:{}", scope, key.to_ascii_lowercase());
        let mut bucket = self
            .buckets
            .entry(bucket_key)
            .or_insert_with(|| Bucket::new(limit));

        if bucket.allow_request(1) {
            Ok(())
        } else {
            tracing::warn!(scope, key, "Rate limit exceeded");
            Err(AppError::RateLimitExceeded(format!("Rate limit for {} on {}", key, scope)))
        }
    }

    /// Drop buckets that have fully refilled. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts_then_rejects() {
        let limiter = RateLimiter::new();
        let limit = Limit {
            capacity: 3,
            refill_rate: 0.0,
        };
        for _ in 0..3 {
            assert!(limiter.check("bids", "0xabc", limit).is_ok());
        }
        assert!(matches!(
            limiter.check("bids", "0xABC", limit),
            Err(AppError::RateLimitExceeded(_))
        ));
        assert!(limiter.check("bids", "0xdef", limit).is_ok());
        assert!(limiter.check("ws", "0xabc", limit).is_ok());
    }

    #[test]
    fn test_prune_keeps_only_draining_buckets() {
        let limiter = RateLimiter::new();
        let drained = Limit {
            capacity: 2,
            refill_rate: 0.0,
        };
        limiter.check("bids", "0xaaa", drained).unwrap();
        limiter.check("bids", "0xbbb", drained).unwrap();
        limiter.check("bids", "0xbbb", drained).unwrap();
        limiter.check("ws", "10.0.0.1", Limit {
            capacity: 2,
            refill_rate: 1_000_000.0,
        })
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(limiter.prune_idle(), 1);
        assert_eq!(limiter.tracked_keys(), 2);
        assert!(matches!(
            limiter.check("bids", "0xbbb", drained),
            Err(AppError::RateLimitExceeded(_))
        ));
    }
}
