//! Failure-ratio circuit breaker with half-open probing.
//!
//! Outcomes land in a sliding sample window. Once the window holds at least
//! `minimum_throughput` samples and the failure share exceeds
//! `failure_ratio`, the circuit opens and calls fail fast. After
//! `break_duration` a single probe is let through; its outcome decides
//! whether the circuit closes again or re-opens.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    /// Manually forced open; only `reset` leaves this state.
    Isolated,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Isolated => "isolated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    pub failure_ratio: f64,
    pub sampling_window: Duration,
    pub minimum_throughput: u32,
    pub break_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(30),
            minimum_throughput: 10,
            break_duration: Duration::from_secs(15),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    // (recorded_at, success) pairs inside the sampling window.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Asks for permission to place a call. An open circuit whose break has
    /// elapsed moves to half-open here and admits exactly one probe.
    pub fn acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Isolated => false,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.settings.break_duration)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.probe_in_flight = false;
            inner.opened_at = None;
            inner.window.clear();
            return;
        }
        let now = Instant::now();
        inner.window.push_back((now, true));
        self.prune(&mut inner, now);
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
            inner.opened_at = Some(now);
            return;
        }
        inner.window.push_back((now, false));
        self.prune(&mut inner, now);

        let samples = inner.window.len() as u32;
        if samples < self.settings.minimum_throughput {
            return;
        }
        let failures = inner.window.iter().filter(|(_, ok)| !ok).count() as f64;
        if failures / samples as f64 > self.settings.failure_ratio {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.window.clear();
        }
    }

    /// Forces the circuit open until `reset` is called.
    pub fn isolate(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Isolated;
        inner.probe_in_flight = false;
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.window.front() {
            if now.duration_since(*at) > self.settings.sampling_window {
                inner.window.pop_front();
            } else {
                break;
            }
        }
    }
}
