//! Keyed token-bucket rate limiting over the governor crate
//!
//! Each caller (API-key digest, or the shared anonymous bucket when
//! authentication is disabled) gets an independent bucket sized from the
//! configured `N/period` spec.

use edtech_common::config::{RateLimitSpec, RatePeriod};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

pub struct ApiRateLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    clock: DefaultClock,
}

impl ApiRateLimiter {
    pub fn new(spec: &RateLimitSpec) -> Self {
        // Spec parsing rejects zero, so the fallback never fires
        let max = NonZeroU32::new(spec.max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = match spec.period {
            RatePeriod::Second => Quota::per_second(max),
            RatePeriod::Minute => Quota::per_minute(max),
            RatePeriod::Hour => Quota::per_hour(max),
        };
        let clock = DefaultClock::default();
        let limiter = RateLimiter::new(quota, DefaultKeyedStateStore::default(), clock.clone());
        Self { limiter, clock }
    }

    /// Take one token for `caller`.
    ///
    /// On refusal returns the whole seconds until the next token becomes
    /// available, floored at 1 so `Retry-After` is never zero.
    pub fn check(&self, caller: &str) -> Result<(), u64> {
        match self.limiter.check_key(&caller.to_string()) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Err(wait.as_secs().max(1))
            }
        }
    }
}
