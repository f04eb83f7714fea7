//! Per-endpoint circuit breaker. A run against a dead endpoint should degrade
//! into fast `Unknown` outcomes instead of paying the full retry budget on
//! every leaf.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

/// Error returned when the breaker refuses to let a request through.
#[derive(Debug)]
pub enum CircuitBreakerError {
    CircuitOpen,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "endpoint circuit breaker is open"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    half_open_in_flight: usize,
}

impl BreakerInner {
    fn open(&mut self) {
        self.opened_at = Some(Instant::now());
        self.half_open_in_flight = 0;
    }
}

/// Closed/Open/Half-Open breaker shared by all requests to one endpoint.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    label: Arc<str>,
    inner: Arc<Mutex<BreakerInner>>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_sample: usize,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            1,
        )
    }
}

impl RpcCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration, half_open_sample: usize) -> Self {
        Self::for_endpoint("", failure_threshold, cooldown, half_open_sample)
    }

    pub fn for_endpoint(
        label: &str,
        failure_threshold: usize,
        cooldown: Duration,
        half_open_sample: usize,
    ) -> Self {
        let cooldown = if cooldown.is_zero() {
            Duration::from_secs(1)
        } else {
            cooldown
        };

        Self {
            label: Arc::from(label),
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            half_open_sample: half_open_sample.max(1),
        }
    }

    /// Breaker with default thresholds whose transitions are logged under `label`.
    pub fn labelled(label: &str) -> Self {
        Self::for_endpoint(
            label,
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            1,
        )
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.inner.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Checks whether a request may proceed, reserving a Half-Open probe slot if needed.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.cooldown)
                .unwrap_or(false);
            if !cooled_down {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
            inner.half_open_in_flight = 0;
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.half_open_sample {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            inner.half_open_in_flight += 1;
        }

        Ok(inner.state)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        Self::release_probe(&mut inner);
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        Self::release_probe(&mut inner);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trips = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trips {
            inner.open();
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn release_probe(inner: &mut BreakerInner) {
        if inner.state == CircuitState::HalfOpen && inner.half_open_in_flight > 0 {
            inner.half_open_in_flight -= 1;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        if inner.state != next {
            tracing::warn!(
                endpoint = %self.label,
                previous = ?inner.state,
                next = ?next,
                consecutive_failures = inner.consecutive_failures,
                "endpoint circuit breaker state changed"
            );
            inner.state = next;
        }
    }
}
