//! Throttle Controller - Minimum Spacing Between Calls per Source
//!
//! A keyed GCRA limiter with a quota of one cell per `min_interval`
//! and burst 1: a call to a source waits `min_interval - (now -
//! last_call)` when positive. `acquire` blocks the calling thread and
//! is only used from the priority chain.

use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

/// Default spacing between calls to the same historical source.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Enforces a minimum inter-call interval per source name.
pub struct ThrottleController {
    min_interval: Duration,
    clock: DefaultClock,
    /// `None` when throttling is disabled (zero interval).
    limiter: Option<KeyedLimiter>,
}

impl ThrottleController {
    pub fn new(min_interval: Duration) -> Self {
        let clock = DefaultClock::default();
        let limiter = Quota::with_period(min_interval)
            .map(|quota| RateLimiter::dashmap_with_clock(quota, &clock));
        Self {
            min_interval,
            clock,
            limiter,
        }
    }

    /// A controller that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until `source` may be called, then claim the slot.
    ///
    /// Returns how long the caller was held.
    pub fn acquire(&self, source: &str) -> Duration {
        let Some(limiter) = &self.limiter else {
            return Duration::ZERO;
        };

        let key = source.to_string();
        let mut waited = Duration::ZERO;
        loop {
            match limiter.check_key(&key) {
                Ok(()) => break,
                Err(not_until) => {
                    let wait = not_until.wait_time_from(self.clock.now());
                    debug!(
                        source,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "Throttling source call"
                    );
                    std::thread::sleep(wait);
                    waited += wait;
                }
            }
        }
        waited
    }
}

impl std::fmt::Debug for ThrottleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleController")
            .field("min_interval", &self.min_interval)
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}
