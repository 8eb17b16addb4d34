//! Per-sink circuit breaker: trips open at a 50% error rate over a rolling window, stays
//! open for a fixed timeout, then allows one probe call through in the half-open state.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const WINDOW_SIZE: usize = 20;
const ERROR_RATE_THRESHOLD: f64 = 0.5;
const MIN_SAMPLES_BEFORE_TRIP: usize = 5;

struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
    outcomes: VecDeque<bool>,
}

/// Call sites record `record_success`/`record_failure` after every attempt; `allow_call`
/// gates whether an attempt should be made at all.
pub struct CircuitBreaker {
    open_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(open_timeout: Duration) -> Self {
        Self {
            open_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                outcomes: VecDeque::with_capacity(WINDOW_SIZE),
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.transition_if_timed_out(&mut inner);
        inner.state
    }

    /// Whether a call should be attempted right now. A half-open breaker allows exactly the
    /// caller's single probe through; the caller must report its outcome.
    pub fn allow_call(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.transition_if_timed_out(&mut inner);
        !matches!(inner.state, BreakerState::Open)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.outcomes.push_back(true);
        if inner.outcomes.len() > WINDOW_SIZE {
            inner.outcomes.pop_front();
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.outcomes.push_back(false);
        if inner.outcomes.len() > WINDOW_SIZE {
            inner.outcomes.pop_front();
        }
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }
        if inner.outcomes.len() >= MIN_SAMPLES_BEFORE_TRIP {
            let errors = inner.outcomes.iter().filter(|ok| !**ok).count();
            let rate = errors as f64 / inner.outcomes.len() as f64;
            if rate >= ERROR_RATE_THRESHOLD {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    fn transition_if_timed_out(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }
}
