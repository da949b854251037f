use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Client-side request pacing backed by a token bucket.
///
/// Burst is fixed at one token, so consecutive calls are spaced by
/// `1 / requests_per_second` and the first call goes out immediately.
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Arc<DefaultDirectRateLimiter>,
    per_second: NonZeroU32,
}

impl RequestPacer {
    pub fn per_second(requests: NonZeroU32) -> Self {
        let quota = Quota::per_second(requests).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            per_second: requests,
        }
    }

    /// Wait until the next request may be issued.
    pub async fn ready(&self) {
        self.limiter.until_ready().await;
    }

    pub fn requests_per_second(&self) -> u32 {
        self.per_second.get()
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("per_second", &self.per_second)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn spaces_consecutive_requests() {
        let pacer = RequestPacer::per_second(NonZeroU32::new(20).unwrap());
        let started = Instant::now();
        for _ in 0..3 {
            pacer.ready().await;
        }
        // First token is free, the next two wait ~50ms each.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
