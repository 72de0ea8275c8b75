//! Source Health - Per-source Counters and Circuit Breaker
//!
//! Tracks success/failure counts and latency for one data source and
//! trips a circuit breaker after consecutive failures:
//!
//! - CLOSED: calls allowed.
//! - OPEN: after `fail_threshold` consecutive failures, calls refused
//!   until `recover` has elapsed.
//! - Once the deadline passes, the next availability check closes the
//!   breaker again. There is no probe budget: the single call that
//!   follows either succeeds (stays closed) or fails (re-opens with a
//!   fresh window once the threshold is reached again).
//!
//! All state lives behind one lock, so the open flag and its deadline
//! are always observed together.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Default consecutive failures before the breaker opens.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 3;

/// Breaker tuning for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    /// Consecutive failures that open the breaker.
    pub fail_threshold: u32,
    /// How long the breaker stays open.
    pub recover: Duration,
}

impl CircuitPolicy {
    /// Real-time quote sources: 3 failures, 5 minute cooldown.
    pub const fn realtime() -> Self {
        Self {
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            recover: Duration::from_secs(300),
        }
    }

    /// Historical sources: 3 failures, 10 minute cooldown.
    pub const fn history() -> Self {
        Self {
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            recover: Duration::from_secs(600),
        }
    }
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self::realtime()
    }
}

/// Breaker position. `Open` carries its own deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
}

#[derive(Debug)]
struct HealthState {
    success_count: u64,
    fail_count: u64,
    total_latency: Duration,
    last_success: Option<DateTime<Utc>>,
    last_fail: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    circuit: CircuitState,
}

/// Point-in-time view of one source, as exposed in health reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealthReport {
    pub success: u64,
    pub fail: u64,
    pub avg_latency_ms: f64,
    pub circuit_open: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_fail: Option<DateTime<Utc>>,
}

/// Health tracker and circuit breaker for one source.
///
/// Shared across concurrent chain invocations via `Arc`.
#[derive(Debug)]
pub struct SourceHealth {
    name: String,
    policy: CircuitPolicy,
    state: Mutex<HealthState>,
}

impl SourceHealth {
    pub fn new(name: impl Into<String>, policy: CircuitPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(HealthState {
                success_count: 0,
                fail_count: 0,
                total_latency: Duration::ZERO,
                last_success: None,
                last_fail: None,
                consecutive_failures: 0,
                circuit: CircuitState::Closed,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CircuitPolicy {
        self.policy
    }

    /// Record a usable result and its wall-clock latency.
    pub fn record_success(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.success_count += 1;
        state.total_latency += latency;
        state.last_success = Some(Utc::now());
        state.consecutive_failures = 0;
        state.circuit = CircuitState::Closed;
    }

    /// Record a failed or empty call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a failure observed at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.fail_count += 1;
        state.consecutive_failures += 1;
        state.last_fail = Some(Utc::now());

        if state.consecutive_failures >= self.policy.fail_threshold {
            state.circuit = CircuitState::Open {
                until: now + self.policy.recover,
            };
            warn!(
                source = %self.name,
                consecutive_failures = state.consecutive_failures,
                recover_secs = self.policy.recover.as_secs(),
                "Circuit breaker OPEN"
            );
        }
    }

    /// Whether the source may be called now.
    ///
    /// Not a pure query: an open breaker whose deadline has passed is
    /// flipped back to closed by this call.
    pub fn is_available(&self) -> bool {
        self.is_available_at(Instant::now())
    }

    /// [`SourceHealth::is_available`] evaluated at `now`.
    pub fn is_available_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => true,
            CircuitState::Open { until } if now >= until => {
                state.circuit = CircuitState::Closed;
                info!(source = %self.name, "Circuit breaker CLOSED (recovery)");
                true
            }
            CircuitState::Open { .. } => false,
        }
    }

    /// Current breaker position without the recovery side effect.
    pub fn circuit(&self) -> CircuitState {
        self.state.lock().circuit
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Mean latency over successful calls.
    pub fn avg_latency(&self) -> Duration {
        let state = self.state.lock();
        avg_latency(&state)
    }

    pub fn report(&self) -> SourceHealthReport {
        let state = self.state.lock();
        let avg_ms = avg_latency(&state).as_secs_f64() * 1000.0;
        SourceHealthReport {
            success: state.success_count,
            fail: state.fail_count,
            avg_latency_ms: (avg_ms * 10.0).round() / 10.0,
            circuit_open: matches!(state.circuit, CircuitState::Open { .. }),
            consecutive_failures: state.consecutive_failures,
            last_success: state.last_success,
            last_fail: state.last_fail,
        }
    }
}

fn avg_latency(state: &HealthState) -> Duration {
    let successes = u32::try_from(state.success_count.max(1)).unwrap_or(u32::MAX);
    state.total_latency / successes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CircuitPolicy {
        CircuitPolicy {
            fail_threshold: 3,
            recover: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_starts_closed() {
        let health = SourceHealth::new("tencent", policy());
        assert!(health.is_available());
        assert_eq!(health.circuit(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let health = SourceHealth::new("tencent", policy());
        let t0 = Instant::now();
        health.record_failure_at(t0);
        health.record_failure_at(t0);
        assert!(health.is_available_at(t0));
        health.record_failure_at(t0);
        assert!(!health.is_available_at(t0));
        assert!(!health.is_available_at(t0 + Duration::from_secs(299)));
        assert!(health.report().circuit_open);
    }

    #[test]
    fn test_recovers_after_deadline() {
        let health = SourceHealth::new("sina", policy());
        let t0 = Instant::now();
        for _ in 0..3 {
            health.record_failure_at(t0);
        }
        assert!(health.is_available_at(t0 + Duration::from_secs(300)));
        assert_eq!(health.circuit(), CircuitState::Closed);
    }

    #[test]
    fn test_success_resets_streak() {
        let health = SourceHealth::new("sina", policy());
        health.record_failure();
        health.record_failure();
        health.record_success(Duration::from_millis(40));
        health.record_failure();
        assert!(health.is_available());
        assert_eq!(health.consecutive_failures(), 1);
    }

    #[test]
    fn test_single_failure_after_recovery_reopens() {
        let health = SourceHealth::new("eastmoney", policy());
        let t0 = Instant::now();
        for _ in 0..3 {
            health.record_failure_at(t0);
        }
        let later = t0 + Duration::from_secs(301);
        assert!(health.is_available_at(later));
        // Streak was never reset by a success, so one more failure re-opens.
        health.record_failure_at(later);
        assert!(!health.is_available_at(later));
    }

    #[test]
    fn test_avg_latency() {
        let health = SourceHealth::new("ths", policy());
        assert_eq!(health.avg_latency(), Duration::ZERO);
        health.record_success(Duration::from_millis(100));
        health.record_success(Duration::from_millis(300));
        assert_eq!(health.avg_latency(), Duration::from_millis(200));
        assert!((health.report().avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }
}
