use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{ResolveError, Result};

/// Token bucket shared by every outbound call to one upstream service.
///
/// Cloning shares the bucket. Callers wait for a token instead of failing.
#[derive(Clone)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Arc<Mutex<Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `qps` tokens per second, with a burst of `qps`.
    pub fn new(qps: u32) -> Self {
        let rate = f64::from(qps.max(1));
        Self {
            rate,
            burst: rate,
            state: Arc::new(Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            })),
        }
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }

            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limit: waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Worker permits derived from an upstream rate: half of it, within `[1, 20]`.
pub fn permits_for_rate(qps: u32) -> usize {
    (qps / 2).clamp(1, 20) as usize
}
