//! Shared byte-budget token bucket, used separately for the CPU-side
//! hashing bucket and the network-side upload/download buckets. Lazily
//! refilled: tracks the last-refill instant and tops up on each
//! `acquire` rather than running a background ticker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A byte-budget limiter: `rate_bytes_per_sec` tokens accrue per second,
/// capped at one second's worth (no unbounded bursting). `acquire` waits
/// cooperatively until enough tokens are available rather than failing.
pub struct TokenBucket {
    rate_bytes_per_sec: u64,
    bucket: Mutex<Bucket>,
    total_consumed: AtomicU64,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            rate_bytes_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: rate_bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
            total_consumed: AtomicU64::new(0),
        }
    }

    /// Unlimited bucket, used when a rate of zero means "no cap" in
    /// configuration.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn total_consumed(&self) -> u64 {
        self.total_consumed.load(Ordering::Relaxed)
    }

    fn refill(bucket: &mut Bucket, rate: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate as f64).min(rate as f64);
        bucket.last_refill = now;
    }

    /// Block (cooperatively, via short async sleeps) until `bytes` worth
    /// of budget is available, then debit it.
    pub async fn acquire(&self, bytes: u64) {
        if self.rate_bytes_per_sec == u64::MAX {
            self.total_consumed.fetch_add(bytes, Ordering::Relaxed);
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                Self::refill(&mut bucket, self.rate_bytes_per_sec);
                if bucket.tokens >= bytes as f64 {
                    bucket.tokens -= bytes as f64;
                    None
                } else {
                    let deficit = bytes as f64 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.rate_bytes_per_sec as f64))
                }
            };
            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d.min(Duration::from_millis(250))).await,
            }
        }
        self.total_consumed.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_bucket_never_blocks() {
        let bucket = TokenBucket::unlimited();
        bucket.acquire(1_000_000_000).await;
        assert_eq!(bucket.total_consumed(), 1_000_000_000);
    }

    #[tokio::test]
    async fn bucket_admits_burst_up_to_capacity() {
        let bucket = TokenBucket::new(1_000_000);
        bucket.acquire(500_000).await;
        bucket.acquire(500_000).await;
        assert_eq!(bucket.total_consumed(), 1_000_000);
    }

    #[tokio::test]
    async fn bucket_throttles_when_exhausted() {
        let bucket = TokenBucket::new(1_000_000);
        bucket.acquire(1_000_000).await;
        let start = Instant::now();
        bucket.acquire(100_000).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
