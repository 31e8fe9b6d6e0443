//! Per-target circuit breaker.
//!
//! ```text
//! Closed   → Open:     consecutive failures reach failure_threshold
//! Open     → HalfOpen: cool-down (timeout) elapsed
//! HalfOpen → Closed:   success_threshold probes succeed
//! HalfOpen → Open:     any probe fails
//! ```
//!
//! All bookkeeping lives behind one mutex. Every transition starts a new
//! generation; outcomes reported against an older generation are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::resilience::errors::CircuitOpen;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    /// Cool-down spent in Open before probing.
    pub timeout: Duration,
    pub success_threshold: u32,
    pub half_open_max_probes: u32,
    /// Closed-state counting interval; counts reset at every boundary.
    pub interval: Option<Duration>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_probes: 1,
            interval: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub counts: Counts,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub half_open_max_probes: u32,
    pub in_flight_probes: u32,
    pub timeout_secs: u64,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Closed: next interval boundary. Open: end of cool-down.
    expiry: Option<Instant>,
    in_flight_probes: u32,
    opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

#[derive(Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

/// Admission for one call. Dropping it unsettled releases the probe slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.after_call(self.generation, self.probe, outcome);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker
                .after_call(self.generation, self.probe, Outcome::Ignored);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let expiry = settings.interval.map(|interval| Instant::now() + interval);
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
                in_flight_probes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now())
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.current_state(&mut inner, Instant::now());
        inner.counts
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, Instant::now());
        BreakerStats {
            name: self.name.clone(),
            state,
            counts: inner.counts,
            failure_threshold: self.settings.failure_threshold,
            success_threshold: self.settings.success_threshold,
            half_open_max_probes: self.settings.half_open_max_probes,
            in_flight_probes: inner.in_flight_probes,
            timeout_secs: self.settings.timeout.as_secs(),
            opened_at: inner.opened_at,
        }
    }

    /// Runs `f` if the circuit admits it; every `Err` counts as a failure.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        self.call_with(f, |_| true).await
    }

    /// Like [`call`](Self::call), but errors for which `is_failure` returns
    /// false are neither successes nor failures.
    pub async fn call_with<F, T, E, P>(&self, f: F, is_failure: P) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
        P: FnOnce(&E) -> bool,
    {
        let admission = self.before_call()?;
        let result = f.await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) if is_failure(e) => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };
        admission.settle(outcome);

        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_call(&self) -> Result<Admission<'_>, CircuitOpen> {
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, Instant::now());

        let probe = match state {
            CircuitState::Open => {
                warn!("Circuit breaker {}: Open, rejecting request", self.name);
                return Err(self.rejection(state));
            }
            CircuitState::HalfOpen
                if inner.in_flight_probes >= self.settings.half_open_max_probes =>
            {
                warn!(
                    "Circuit breaker {}: HalfOpen probe limit ({}) reached, rejecting request",
                    self.name, self.settings.half_open_max_probes
                );
                return Err(self.rejection(state));
            }
            CircuitState::HalfOpen => {
                inner.in_flight_probes += 1;
                true
            }
            CircuitState::Closed => false,
        };

        inner.counts.on_request();
        Ok(Admission {
            breaker: self,
            generation: inner.generation,
            probe,
            settled: false,
        })
    }

    fn after_call(&self, generation: u64, probe: bool, outcome: Outcome) {
        let mut inner = self.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now);

        if generation != inner.generation {
            debug!(
                "Circuit breaker {}: discarding outcome from stale generation {}",
                self.name, generation
            );
            return;
        }
        if probe {
            inner.in_flight_probes = inner.in_flight_probes.saturating_sub(1);
        }

        match outcome {
            Outcome::Success => self.on_success(&mut inner, state, now),
            Outcome::Failure => self.on_failure(&mut inner, state, now),
            Outcome::Ignored => {}
        }
    }

    fn on_success(&self, inner: &mut BreakerInner, state: CircuitState, now: Instant) {
        inner.counts.on_success();
        if state == CircuitState::HalfOpen
            && inner.counts.consecutive_successes >= self.settings.success_threshold
        {
            self.set_state(inner, CircuitState::Closed, now);
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner, state: CircuitState, now: Instant) {
        inner.counts.on_failure();
        match state {
            CircuitState::Closed
                if inner.counts.consecutive_failures >= self.settings.failure_threshold =>
            {
                error!(
                    "Circuit breaker {}: Transitioning to Open ({} failures)",
                    self.name, inner.counts.consecutive_failures
                );
                self.set_state(inner, CircuitState::Open, now);
            }
            CircuitState::HalfOpen => {
                error!(
                    "Circuit breaker {}: Probe failed, reopening",
                    self.name
                );
                self.set_state(inner, CircuitState::Open, now);
            }
            _ => {}
        }
    }

    fn current_state(&self, inner: &mut BreakerInner, now: Instant) -> CircuitState {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    info!(
                        "Circuit breaker {}: Cool-down elapsed, transitioning to HalfOpen",
                        self.name
                    );
                    self.set_state(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut BreakerInner, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        inner.opened_at = match state {
            CircuitState::Open => Some(Utc::now()),
            CircuitState::HalfOpen => inner.opened_at,
            CircuitState::Closed => None,
        };
        self.new_generation(inner, now);

        info!(
            "Circuit breaker {}: {:?} -> {:?}",
            self.name, previous, state
        );
    }

    fn new_generation(&self, inner: &mut BreakerInner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.in_flight_probes = 0;
        inner.expiry = match inner.state {
            CircuitState::Closed => self.settings.interval.map(|interval| now + interval),
            CircuitState::Open => Some(now + self.settings.timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn rejection(&self, state: CircuitState) -> CircuitOpen {
        CircuitOpen {
            target: self.name.clone(),
            state,
        }
    }
}
