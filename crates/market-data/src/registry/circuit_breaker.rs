//! Per-provider circuit breaker.
//!
//! Four states:
//!
//! - **Closed**: normal operation.
//! - **Degraded**: failing often enough to be deprioritized, still usable.
//! - **Open**: requests are blocked until the cool-down elapses.
//! - **HalfOpen**: exactly one trial call is let through.
//!
//! Failures increment the count and successes decrement it, so a provider
//! that fails intermittently drifts towards Open only when failures dominate.
//! State is in-memory and resets on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{after, SharedClock, SystemClock};

/// Failures at which a Closed circuit becomes Degraded.
const DEFAULT_DEGRADED_THRESHOLD: u32 = 3;

/// Failures at which the circuit opens.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits before allowing a trial call.
const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(5 * 60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Degraded,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    /// Set while the single half-open trial call is outstanding.
    trial_in_flight: bool,
    successes: u64,
    failures: u64,
    total_latency: Duration,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            trial_in_flight: false,
            successes: 0,
            failures: 0,
            total_latency: Duration::ZERO,
        }
    }

    /// Open -> HalfOpen once the cool-down has passed.
    fn refresh(&mut self, provider: &str, now: DateTime<Utc>) {
        if self.state != CircuitState::Open {
            return;
        }
        if self.next_attempt_at.is_some_and(|at| now >= at) {
            info!(
                "Circuit breaker: transitioning '{}' from Open to HalfOpen",
                provider
            );
            self.state = CircuitState::HalfOpen;
            self.trial_in_flight = false;
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub degraded_threshold: u32,
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: DEFAULT_DEGRADED_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cool_down: DEFAULT_COOL_DOWN,
        }
    }
}

/// Thread-safe per-provider circuit breaker.
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Lock the circuits mutex, recovering from poison if necessary.
    ///
    /// The worst case after recovery is slightly incorrect circuit state,
    /// which is better than panicking.
    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether the provider is currently blocked.
    ///
    /// Transitions Open -> HalfOpen when the cool-down has elapsed. A
    /// half-open circuit whose trial call is outstanding reports open.
    pub fn is_open(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let Some(circuit) = circuits.get_mut(provider) else {
            return false;
        };
        circuit.refresh(provider, now);
        match circuit.state {
            CircuitState::Open => true,
            CircuitState::HalfOpen => circuit.trial_in_flight,
            CircuitState::Closed | CircuitState::Degraded => false,
        }
    }

    /// Claim permission to call `provider`.
    ///
    /// In HalfOpen this consumes the single trial, so a concurrent caller
    /// is refused until the trial's outcome is recorded.
    pub fn acquire(&self, provider: &str) -> bool {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);
        circuit.refresh(provider, now);
        match circuit.state {
            CircuitState::Closed | CircuitState::Degraded => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if circuit.trial_in_flight {
                    false
                } else {
                    debug!("Circuit breaker: trial call granted for '{}'", provider);
                    circuit.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Give back a permission that was never used for a call.
    pub fn release(&self, provider: &str) {
        if let Some(circuit) = self.lock_circuits().get_mut(provider) {
            circuit.trial_in_flight = false;
        }
    }

    /// Record the outcome of one call.
    pub fn record_outcome(&self, provider: &str, success: bool, latency: Duration) {
        if success {
            self.record_success(provider, latency);
        } else {
            self.record_failure(provider, latency);
        }
    }

    fn record_success(&self, provider: &str, latency: Duration) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.successes += 1;
        circuit.total_latency += latency;
        circuit.failure_count = circuit.failure_count.saturating_sub(1);

        match circuit.state {
            CircuitState::HalfOpen | CircuitState::Open => {
                info!(
                    "Circuit breaker: closing circuit for '{}' after successful trial",
                    provider
                );
                circuit.state = CircuitState::Closed;
                circuit.failure_count = 0;
                circuit.next_attempt_at = None;
                circuit.trial_in_flight = false;
            }
            CircuitState::Degraded => {
                if circuit.failure_count < self.config.degraded_threshold {
                    info!("Circuit breaker: '{}' recovered from Degraded", provider);
                    circuit.state = CircuitState::Closed;
                }
            }
            CircuitState::Closed => {
                debug!(
                    "Circuit breaker: success for '{}', failure count {}",
                    provider, circuit.failure_count
                );
            }
        }
    }

    fn record_failure(&self, provider: &str, latency: Duration) {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let circuit = circuits
            .entry(provider.to_string())
            .or_insert_with(Circuit::new);

        circuit.failures += 1;
        circuit.total_latency += latency;
        circuit.failure_count += 1;
        circuit.last_failure_at = Some(now);

        match circuit.state {
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: reopening circuit for '{}' after failed trial",
                    provider
                );
                circuit.state = CircuitState::Open;
                circuit.next_attempt_at = Some(after(now, self.config.cool_down));
                circuit.trial_in_flight = false;
            }
            CircuitState::Open => {
                debug!(
                    "Circuit breaker: additional failure for '{}' (already open)",
                    provider
                );
            }
            CircuitState::Closed | CircuitState::Degraded => {
                if circuit.failure_count >= self.config.failure_threshold {
                    info!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        provider, circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                    circuit.next_attempt_at = Some(after(now, self.config.cool_down));
                } else if circuit.failure_count >= self.config.degraded_threshold {
                    if circuit.state == CircuitState::Closed {
                        warn!(
                            "Circuit breaker: '{}' degraded after {} failures",
                            provider, circuit.failure_count
                        );
                    }
                    circuit.state = CircuitState::Degraded;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        provider, circuit.failure_count, self.config.failure_threshold
                    );
                }
            }
        }
    }

    /// Current state, after applying any due Open -> HalfOpen transition.
    pub fn state(&self, provider: &str) -> CircuitState {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        match circuits.get_mut(provider) {
            Some(circuit) => {
                circuit.refresh(provider, now);
                circuit.state
            }
            None => CircuitState::Closed,
        }
    }

    pub fn is_degraded(&self, provider: &str) -> bool {
        self.state(provider) == CircuitState::Degraded
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.lock_circuits()
            .get(provider)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    /// Reset the circuit for a provider to Closed.
    pub fn reset(&self, provider: &str) {
        if let Some(circuit) = self.lock_circuits().get_mut(provider) {
            info!(
                "Circuit breaker: manually resetting circuit for '{}'",
                provider
            );
            *circuit = Circuit::new();
        }
    }

    pub fn reset_all(&self) {
        self.lock_circuits().clear();
        info!("Circuit breaker: all circuits reset");
    }

    /// Metrics for all tracked providers, sorted by provider id.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let now = self.clock.now();
        let mut circuits = self.lock_circuits();
        let mut metrics: Vec<_> = circuits
            .iter_mut()
            .map(|(provider, circuit)| {
                circuit.refresh(provider, now);
                let calls = circuit.successes + circuit.failures;
                let average_latency_ms = if calls == 0 {
                    0
                } else {
                    (circuit.total_latency.as_millis() / u128::from(calls)) as u64
                };
                CircuitMetrics {
                    provider: provider.clone(),
                    state: circuit.state,
                    failure_count: circuit.failure_count,
                    last_failure_at: circuit.last_failure_at,
                    next_attempt_at: circuit.next_attempt_at,
                    successes: circuit.successes,
                    failures: circuit.failures,
                    average_latency_ms,
                }
            })
            .collect();
        metrics.sort_by(|a, b| a.provider.cmp(&b.provider));
        metrics
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single circuit.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitMetrics {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub successes: u64,
    pub failures: u64,
    pub average_latency_ms: u64,
}
