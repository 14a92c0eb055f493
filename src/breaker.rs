//! Per-provider circuit breakers.
//!
//! `closed -> open` once consecutive failures reach the threshold;
//! `open -> half_open` after the recovery timeout; in `half_open` exactly one
//! trial call is let through. Its success closes the breaker, its failure
//! re-opens it with a fresh timer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitState {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    trial_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::seconds(60),
        }
    }
}

/// Answer to "may I call this provider now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed,
    /// The single half-open trial; the caller must report its outcome.
    Trial,
    Rejected { retry_in: Duration },
}

pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    clock: SharedClock,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: &str, cfg: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.to_string(),
            cfg,
            clock,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn try_acquire(&self) -> Permit {
        let now = self.clock.now();
        let mut st = self.lock();
        match st.state {
            BreakerState::Closed => Permit::Allowed,
            BreakerState::Open => {
                let opened = st.opened_at.unwrap_or(now);
                let elapsed = now.signed_duration_since(opened);
                if elapsed >= self.cfg.recovery_timeout {
                    st.state = BreakerState::HalfOpen;
                    st.trial_in_flight = true;
                    info!(target: "breaker", provider = %self.name, "half-open; admitting trial call");
                    Permit::Trial
                } else {
                    Permit::Rejected {
                        retry_in: self.cfg.recovery_timeout - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if st.trial_in_flight {
                    Permit::Rejected {
                        retry_in: Duration::zero(),
                    }
                } else {
                    st.trial_in_flight = true;
                    Permit::Trial
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut st = self.lock();
        if st.state != BreakerState::Closed {
            info!(target: "breaker", provider = %self.name, "circuit closed");
        }
        *st = CircuitState::default();
        gauge!("research_circuit_open", "provider" => self.name.clone()).set(0.0);
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut st = self.lock();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        let trip = match st.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => st.consecutive_failures >= self.cfg.failure_threshold,
            BreakerState::Open => false,
        };
        if trip {
            st.state = BreakerState::Open;
            st.opened_at = Some(now);
            st.trial_in_flight = false;
            warn!(
                target: "breaker",
                provider = %self.name,
                failures = st.consecutive_failures,
                "circuit opened"
            );
            gauge!("research_circuit_open", "provider" => self.name.clone()).set(1.0);
        }
    }

    /// Give back an unused trial (e.g. the call was cancelled before it resolved).
    pub fn release_trial(&self) {
        let mut st = self.lock();
        if st.state == BreakerState::HalfOpen {
            st.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> CircuitState {
        self.lock().clone()
    }
}

/// Holds a half-open trial and gives it back when dropped, so a caller that
/// panics or is aborted mid-call cannot wedge the breaker in `half_open`.
/// [`TrialGuard::disarm`] once the outcome has been recorded.
pub struct TrialGuard {
    breaker: Option<Arc<CircuitBreaker>>,
}

impl TrialGuard {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker: Some(breaker),
        }
    }

    pub fn disarm(mut self) {
        self.breaker = None;
    }
}

impl Drop for TrialGuard {
    fn drop(&mut self) {
        if let Some(b) = self.breaker.take() {
            b.release_trial();
        }
    }
}

/// One breaker per provider name. The map is fixed at construction; each
/// breaker carries its own lock so unrelated providers never contend.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new<I, S>(names: I, cfg: BreakerConfig, clock: SharedClock) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let breakers = names
            .into_iter()
            .map(|n| {
                let n = n.as_ref().to_string();
                let b = Arc::new(CircuitBreaker::new(&n, cfg, clock.clone()));
                (n, b)
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|(k, b)| (k.clone(), b.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "p",
            BreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::seconds(60),
            },
            clock,
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn trips_at_threshold_and_rejects() {
        let clock = ManualClock::shared(t0());
        let b = breaker(clock.clone());
        b.record_failure();
        assert_eq!(b.try_acquire(), Permit::Allowed);
        b.record_failure();
        assert_eq!(b.snapshot().state, BreakerState::Open);
        clock.advance(Duration::seconds(10));
        assert_eq!(
            b.try_acquire(),
            Permit::Rejected {
                retry_in: Duration::seconds(50)
            }
        );
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        let clock = ManualClock::shared(t0());
        let b = breaker(clock.clone());
        b.record_failure();
        b.record_failure();
        clock.advance(Duration::seconds(60));
        assert_eq!(b.try_acquire(), Permit::Trial);
        assert!(matches!(b.try_acquire(), Permit::Rejected { .. }));
        b.record_success();
        assert_eq!(b.snapshot(), CircuitState::default());
        assert_eq!(b.try_acquire(), Permit::Allowed);
    }

    #[test]
    fn failed_trial_reopens_with_fresh_timer() {
        let clock = ManualClock::shared(t0());
        let b = breaker(clock.clone());
        b.record_failure();
        b.record_failure();
        clock.advance(Duration::seconds(61));
        assert_eq!(b.try_acquire(), Permit::Trial);
        b.record_failure();
        let s = b.snapshot();
        assert_eq!(s.state, BreakerState::Open);
        assert_eq!(s.opened_at, Some(t0() + Duration::seconds(61)));
        clock.advance(Duration::seconds(30));
        assert!(matches!(b.try_acquire(), Permit::Rejected { .. }));
    }

    #[test]
    fn released_trial_can_be_retaken() {
        let clock = ManualClock::shared(t0());
        let b = breaker(clock.clone());
        b.record_failure();
        b.record_failure();
        clock.advance(Duration::seconds(60));
        assert_eq!(b.try_acquire(), Permit::Trial);
        b.release_trial();
        assert_eq!(b.try_acquire(), Permit::Trial);
    }

    #[test]
    fn trial_guard_releases_unless_disarmed() {
        let clock = ManualClock::shared(t0());
        let b = Arc::new(breaker(clock.clone()));
        b.record_failure();
        b.record_failure();
        clock.advance(Duration::seconds(60));

        assert_eq!(b.try_acquire(), Permit::Trial);
        drop(TrialGuard::new(Arc::clone(&b)));
        assert_eq!(b.try_acquire(), Permit::Trial);

        let guard = TrialGuard::new(Arc::clone(&b));
        guard.disarm();
        assert!(matches!(b.try_acquire(), Permit::Rejected { .. }));
    }

    #[test]
    fn registry_is_keyed_by_provider() {
        let clock = ManualClock::shared(t0());
        let r = BreakerRegistry::new(["a", "b"], BreakerConfig::default(), clock);
        assert!(r.get("a").is_some());
        assert!(r.get("zzz").is_none());
        assert_eq!(r.snapshot().len(), 2);
    }
}
