//! Per-provider circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to prevent hammering a
//! failing upstream. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Provider is failing, requests are rejected without an
//!   upstream call until the reset timeout elapses.
//! - **HalfOpen**: Exactly one trial call is allowed through; its
//!   outcome decides between Closed and Open.
//!
//! State is mutated only through the aggregator's call-result handling.
//! The breaker is in-memory and resets on application restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::models::ProviderId;

/// Default number of consecutive failures before opening the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time to wait before allowing a trial call.
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Provider is failing - requests are rejected.
    Open,
    /// Testing recovery - a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Outcome of a pre-call circuit check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitCheck {
    /// The call may proceed. If the check itself moved the circuit
    /// (Open -> HalfOpen), the new state is carried for telemetry.
    /// `trial` marks the caller as holding the single half-open probe;
    /// a holder that ends up not calling upstream (e.g. a cache hit)
    /// must release it via [`CircuitBreaker::cancel_trial`].
    Proceed {
        transition: Option<CircuitState>,
        trial: bool,
    },
    /// The circuit is open (or the half-open trial slot is taken);
    /// skip this provider without counting a new failure.
    Rejected,
}

/// Internal circuit state for a single provider.
#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    /// Consecutive failures while Closed.
    failure_count: u32,
    /// Time of the last recorded failure.
    last_failure: Option<Instant>,
    /// While Open: rejections continue until this instant.
    opened_until: Option<Instant>,
    /// While HalfOpen: whether the single trial call is outstanding.
    probe_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            opened_until: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait before allowing a trial call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
        }
    }
}

/// Per-provider circuit breaker.
///
/// Thread-safe; tracks each provider's circuit independently so one
/// upstream's degradation never affects another's availability.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    ///
    /// For circuit breakers it's safe to recover from a poisoned mutex:
    /// the worst case is slightly incorrect circuit state, which is
    /// better than panicking.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check whether a call to the provider may proceed.
    ///
    /// Handles the Open -> HalfOpen transition: the first check at or
    /// after `opened_until` claims the single half-open trial slot.
    /// Further checks are rejected until the trial's outcome is
    /// reported via [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn check(&self, provider: &ProviderId) -> CircuitCheck {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => CircuitCheck::Proceed {
                transition: None,
                trial: false,
            },
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    debug!(
                        "Circuit breaker: half-open trial already outstanding for '{}'",
                        provider
                    );
                    CircuitCheck::Rejected
                } else {
                    circuit.probe_in_flight = true;
                    CircuitCheck::Proceed {
                        transition: None,
                        trial: true,
                    }
                }
            }
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_until
                    .map(|until| Instant::now() >= until)
                    .unwrap_or(true);
                if elapsed {
                    info!(
                        "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                        provider
                    );
                    circuit.state = CircuitState::HalfOpen;
                    circuit.opened_until = None;
                    circuit.probe_in_flight = true;
                    CircuitCheck::Proceed {
                        transition: Some(CircuitState::HalfOpen),
                        trial: true,
                    }
                } else {
                    CircuitCheck::Rejected
                }
            }
        }
    }

    /// Release a half-open trial slot without an outcome.
    ///
    /// For callers that claimed the trial via [`check`](Self::check)
    /// but never reached upstream (a cache hit answered instead). The
    /// circuit stays HalfOpen and the next check may claim the trial.
    pub fn cancel_trial(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        if let Some(circuit) = circuits.get_mut(provider.as_ref()) {
            if circuit.state == CircuitState::HalfOpen {
                circuit.probe_in_flight = false;
            }
        }
    }

    /// Record a successful call for a provider.
    ///
    /// In Closed state: resets the failure count. In HalfOpen state:
    /// the trial succeeded, so the circuit closes. Returns the new
    /// state when a transition occurred.
    pub fn record_success(&self, provider: &ProviderId) -> Option<CircuitState> {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count = 0;
                debug!(
                    "Circuit breaker: success for '{}', failure count reset",
                    provider
                );
                None
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful trial",
                    provider
                );
                circuit.state = CircuitState::Closed;
                circuit.failure_count = 0;
                circuit.last_failure = None;
                circuit.opened_until = None;
                circuit.probe_in_flight = false;
                Some(CircuitState::Closed)
            }
            CircuitState::Open => {
                // Shouldn't happen - check() rejects while open
                debug!(
                    "Circuit breaker: unexpected success for '{}' in Open state",
                    provider
                );
                None
            }
        }
    }

    /// Record a failed call for a provider.
    ///
    /// Increments the consecutive-failure count and may open the
    /// circuit. In HalfOpen state the failed trial reopens the circuit
    /// and the reset timeout restarts from now. Returns the new state
    /// when a transition occurred.
    pub fn record_failure(&self, provider: &ProviderId) -> Option<CircuitState> {
        let mut circuits = self.lock_circuits();

        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        let now = Instant::now();
        circuit.failure_count += 1;
        circuit.last_failure = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_until = Some(now + self.config.reset_timeout);
                    Some(CircuitState::Open)
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.failure_count, self.config.failure_threshold
                    );
                    None
                }
            }
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed trial",
                    provider
                );
                circuit.state = CircuitState::Open;
                circuit.opened_until = Some(now + self.config.reset_timeout);
                circuit.probe_in_flight = false;
                Some(CircuitState::Open)
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
                None
            }
        }
    }

    /// Get the current state for a provider.
    pub fn state(&self, provider: &ProviderId) -> CircuitState {
        let circuits = self.lock_circuits();
        circuits
            .get(provider.as_ref())
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Get the consecutive-failure count for a provider.
    pub fn failure_count(&self, provider: &ProviderId) -> u32 {
        let circuits = self.lock_circuits();
        circuits
            .get(provider.as_ref())
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Reset the circuit for a provider to Closed state.
    pub fn reset(&self, provider: &ProviderId) {
        let mut circuits = self.lock_circuits();
        if let Some(circuit) = circuits.get_mut(provider.as_ref()) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                provider
            );
            *circuit = Circuit::new();
        }
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        let mut circuits = self.lock_circuits();
        circuits.clear();
        info!("Circuit breaker: all circuits reset");
    }

    /// Get metrics for all tracked providers.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let circuits = self.lock_circuits();
        circuits
            .iter()
            .map(|(provider, circuit)| CircuitMetrics {
                provider: provider.clone(),
                state: circuit.state,
                failure_count: circuit.failure_count,
                last_failure: circuit.last_failure,
            })
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    /// Provider identifier.
    pub provider: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive-failure count.
    pub failure_count: u32,
    /// Time of the last failure.
    pub last_failure: Option<Instant>,
}
