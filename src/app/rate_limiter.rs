//! Global upload budget backed by governor's GCRA limiter.
//!
//! The quota allows a burst of `max_uploads` and refills one slot every
//! `window / max_uploads`, so at most `max_uploads` uploads land in any window.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::rate_limits::UploadRateLimit;

type DirectRateLimiter =
    GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

pub struct RateLimitInfo {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the next upload would be admitted; zero when not limited.
    pub retry_after: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    limit: NonZeroU32,
    limiter: Arc<DirectRateLimiter>,
}

impl RateLimiter {
    pub fn new(config: UploadRateLimit) -> Self {
        let limit = NonZeroU32::new(config.max_uploads).unwrap_or(NonZeroU32::MIN);
        let window = Duration::from_secs(config.window_seconds.max(1));
        let quota = Quota::with_period(window / limit.get())
            .unwrap_or_else(|| Quota::per_second(limit))
            .allow_burst(limit);

        Self {
            limit,
            limiter: Arc::new(
                GovernorRateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>(),
            ),
        }
    }

    /// Takes one slot from the budget unless it is exhausted.
    pub fn acquire(&self) -> RateLimitInfo {
        match self.limiter.check() {
            Ok(snapshot) => RateLimitInfo {
                limited: false,
                limit: self.limit.get(),
                remaining: snapshot.remaining_burst_capacity(),
                retry_after: Duration::ZERO,
            },
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(self.limiter.clock().now());
                tracing::debug!(
                    limit = self.limit.get(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "upload rate limit exceeded"
                );
                RateLimitInfo {
                    limited: true,
                    limit: self.limit.get(),
                    remaining: 0,
                    retry_after,
                }
            }
        }
    }
}
