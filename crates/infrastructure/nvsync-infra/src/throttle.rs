use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Byte-rate limiter shared by every transfer of a run.
#[derive(Clone)]
pub struct Throttle {
    limiter: Arc<DirectLimiter>,
    burst: u32,
}

impl Throttle {
    /// `None` for a zero rate, meaning unlimited.
    pub fn per_second(bytes_per_sec: u64) -> Option<Self> {
        let rate = u32::try_from(bytes_per_sec).unwrap_or(u32::MAX);
        let nz = NonZeroU32::new(rate)?;
        Some(Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(nz))),
            burst: rate,
        })
    }

    /// Wait until `bytes` may pass. Chunks larger than one second's budget are
    /// admitted in burst-sized pieces, since governor rejects oversize requests.
    pub async fn acquire(&self, bytes: usize) {
        let mut remaining = u32::try_from(bytes).unwrap_or(u32::MAX);
        while remaining > 0 {
            let step = remaining.min(self.burst);
            if let Some(nz) = NonZeroU32::new(step) {
                // Only fails when `step` exceeds the burst, which the min above prevents.
                let _ = self.limiter.until_n_ready(nz).await;
            }
            remaining -= step;
        }
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("bytes_per_sec", &self.burst)
            .finish()
    }
}
