//! Circuit Breaker Implementation
//!
//! Implements the circuit breaker pattern to stop sending traffic to a
//! provider that keeps failing. The circuit breaker has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Too many failures, requests are rejected immediately
//! - HalfOpen: Testing recovery, exactly one trial request allowed
//!
//! State transitions:
//! - Closed → Open: After consecutive failures reach the threshold
//! - Open → HalfOpen: On the first gate check after the cooldown expires
//! - HalfOpen → Closed: The trial request succeeds
//! - HalfOpen → Open: The trial request fails (cooldown restarts)
//!
//! There is no timer task. The Open → HalfOpen transition happens lazily
//! inside [`CircuitBreaker::admit`].
//!
//! Each admitted request carries an [`Admission`] ticket back to
//! [`CircuitBreaker::record`]. Only the ticket of the current trial can close
//! or re-open a half-open circuit; outcomes of requests admitted earlier are
//! counted without moving the state.
//!
//! Every transition runs under a per-breaker mutex, so a gate check or an
//! outcome never interleaves with another one for the same provider.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests rejected until the cooldown expires
    Open,
    /// Testing recovery - a single trial request allowed
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub cooldown: Duration,
    /// Trailing window for the recent-failure count used in ranking
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            failure_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Ticket handed out by the gate check and returned with the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Generation of the half-open trial this request is, if any
    trial: Option<u64>,
}

impl Admission {
    /// Admission of an ordinary request through a closed circuit
    pub const REGULAR: Admission = Admission { trial: None };

    /// Whether this request is a half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    /// Set while the single half-open trial is in flight
    trial_in_flight: bool,
    /// Bumped every time a trial slot is handed out
    trial_generation: u64,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    recent_failures: VecDeque<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            circuit: CircuitState::Closed,
            trial_in_flight: false,
            trial_generation: 0,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
            recent_failures: VecDeque::new(),
        }
    }

    fn claim_trial(&mut self) -> Admission {
        self.trial_in_flight = true;
        self.trial_generation = self.trial_generation.wrapping_add(1);
        Admission {
            trial: Some(self.trial_generation),
        }
    }

    /// Whether `admission` is the trial the half-open circuit is waiting on
    fn is_current_trial(&self, admission: Admission) -> bool {
        self.circuit == CircuitState::HalfOpen
            && self.trial_in_flight
            && admission.trial == Some(self.trial_generation)
    }

    fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        self.opened_at
            .is_none_or(|opened| now.saturating_duration_since(opened) >= cooldown)
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent_failure_count(&self, now: Instant, window: Duration) -> usize {
        self.recent_failures
            .iter()
            .filter(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }
}

/// Point-in-time view of a provider's health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub state: CircuitState,
    pub trial_in_flight: bool,
    pub consecutive_failures: u32,
    pub recent_failures: usize,
    /// Seconds since the last recorded failure
    pub secs_since_last_failure: Option<f64>,
    /// Seconds until an open circuit admits its trial request
    pub cooldown_remaining_secs: Option<f64>,
}

/// Per-provider circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the current circuit state (no lazy transition is applied)
    pub fn state(&self) -> CircuitState {
        self.lock().circuit
    }

    /// Get the number of consecutive failures
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Number of failures inside the trailing window
    pub fn recent_failures(&self) -> usize {
        self.lock()
            .recent_failure_count(Instant::now(), self.config.failure_window)
    }

    /// Whether the provider has failed within the trailing window
    pub fn has_recent_failures(&self) -> bool {
        self.recent_failures() > 0
    }

    /// Gate check.
    ///
    /// Returns a ticket if the caller may send a request now. On an open
    /// circuit whose cooldown has expired this moves to half-open and hands
    /// the trial slot to the caller; any other caller gets `None` until the
    /// trial's outcome is recorded.
    pub fn admit(&self) -> Option<Admission> {
        let now = Instant::now();
        let mut state = self.lock();

        match state.circuit {
            CircuitState::Closed => Some(Admission::REGULAR),
            CircuitState::Open => {
                if state.cooldown_elapsed(now, self.config.cooldown) {
                    state.circuit = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker half-open (admitting trial request)");
                    Some(state.claim_trial())
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    None
                } else {
                    Some(state.claim_trial())
                }
            }
        }
    }

    /// Non-mutating availability check used for ranking.
    ///
    /// An open circuit past its cooldown counts as available since the next
    /// gate check will admit a trial.
    pub fn is_available(&self) -> bool {
        let now = Instant::now();
        let state = self.lock();

        match state.circuit {
            CircuitState::Closed => true,
            CircuitState::Open => state.cooldown_elapsed(now, self.config.cooldown),
            CircuitState::HalfOpen => !state.trial_in_flight,
        }
    }

    /// Record the outcome of an attempt admitted with `admission`
    pub fn record(&self, admission: Admission, success: bool) {
        let now = Instant::now();
        let mut state = self.lock();
        let is_trial = state.is_current_trial(admission);

        if success {
            state.consecutive_failures = 0;
            if is_trial {
                state.circuit = CircuitState::Closed;
                state.trial_in_flight = false;
                state.opened_at = None;
                tracing::info!("Circuit breaker closed (recovered)");
            }
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);
        state.recent_failures.push_back(now);
        state.prune(now, self.config.failure_window);

        match state.circuit {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.circuit = CircuitState::Open;
                    state.opened_at = Some(now);
                    tracing::warn!(
                        failures = state.consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if is_trial => {
                state.circuit = CircuitState::Open;
                state.trial_in_flight = false;
                state.opened_at = Some(now);
                tracing::warn!("Circuit breaker re-opened (trial request failed)");
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // Late result from a call admitted before the circuit opened
            }
        }
    }

    /// Record a success for a request admitted through a closed circuit
    pub fn record_success(&self) {
        self.record(Admission::REGULAR, true);
    }

    /// Record a failure for a request admitted through a closed circuit
    pub fn record_failure(&self) {
        self.record(Admission::REGULAR, false);
    }

    /// Diagnostic snapshot
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let state = self.lock();

        let cooldown_remaining_secs = match (state.circuit, state.opened_at) {
            (CircuitState::Open, Some(opened)) => Some(
                self.config
                    .cooldown
                    .saturating_sub(now.saturating_duration_since(opened))
                    .as_secs_f64(),
            ),
            _ => None,
        };

        HealthSnapshot {
            state: state.circuit,
            trial_in_flight: state.trial_in_flight,
            consecutive_failures: state.consecutive_failures,
            recent_failures: state.recent_failure_count(now, self.config.failure_window),
            secs_since_last_failure: state
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
            cooldown_remaining_secs,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
