// Request pacing for classifier endpoints.
//
// Hosted moderation APIs meter requests per second. With several items in
// flight at once, the HTTP clients share one limiter each so the burst from
// a tick is spread out instead of tripping the provider's 429s. A rate of
// zero (or less, or NaN) disables pacing; spacing is capped at one hour.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

const MAX_SPACING: Duration = Duration::from_secs(3600);

/// Enforces a minimum spacing between requests.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Pacing>>,
}

struct Pacing {
    /// Minimum time between requests; None means unlimited
    interval: Option<Duration>,
    /// The earliest instant the next request may go out
    next_slot: Option<Instant>,
}

impl RateLimiter {
    /// Allow `requests_per_second` requests per second.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = (requests_per_second > 0.0).then(|| {
            Duration::try_from_secs_f64(1.0 / requests_per_second)
                .map_or(MAX_SPACING, |spacing| spacing.min(MAX_SPACING))
        });
        Self {
            inner: Arc::new(Mutex::new(Pacing {
                interval,
                next_slot: None,
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Wait until this caller's slot comes up.
    ///
    /// Slots are reserved under the lock and slept on outside it, so
    /// concurrent callers queue up one interval apart.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut pacing = self.inner.lock().await;
            let Some(interval) = pacing.interval else {
                return;
            };
            let now = Instant::now();
            let slot = match pacing.next_slot {
                Some(next) if next > now => next,
                _ => now,
            };
            pacing.next_slot = Some(slot + interval);
            slot
        };

        tokio::time::sleep_until(wait_until).await;
    }
}
