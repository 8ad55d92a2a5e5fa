//! Circuit breaker for failing external dependencies.
//!
//! The breaker stops calling a service after a threshold of failures and
//! periodically lets one probe through to check recovery. State:
//! CLOSED (normal), OPEN (calls rejected), HALF_OPEN (probing).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of accumulated failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration to wait after the last failure before probing recovery.
    #[serde(with = "crate::serde_secs")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Requests are rejected without reaching the dependency.
    Open,
    /// The next request is a recovery probe.
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
///
/// `Open` means the wrapped closure was never invoked; `Inner` carries
/// the closure's own error unchanged so callers can tell "breaker
/// tripped" apart from "call itself failed".
#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    #[error("circuit breaker '{0}' is open")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

impl<E: std::error::Error> CircuitError<E> {
    /// True when the call was rejected without being attempted.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open(_))
    }

    /// The underlying call error, if the call was attempted.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Open(_) => None,
            CircuitError::Inner(err) => Some(err),
        }
    }
}

/// Call statistics for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rejected_requests: u64,
    pub state_changes: u64,
}

impl BreakerStats {
    /// Share of attempted-or-rejected requests that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rejected_requests: u64,
    state_changes: u64,
}

/// Per-dependency failure isolation state machine.
///
/// All state reads and transitions happen under one mutex; the wrapped
/// closure itself runs outside the lock, so a slow call never blocks
/// other callers from observing or transitioning state.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        tracing::info!(
            breaker = %name,
            threshold = config.failure_threshold,
            recovery_secs = config.recovery_timeout.as_secs(),
            "circuit breaker initialized"
        );
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                rejected_requests: 0,
                state_changes: 0,
            }),
        }
    }

    /// Invoke `f` through the breaker.
    ///
    /// Rejected immediately with [`CircuitError::Open`] while the circuit
    /// is open; once `recovery_timeout` has elapsed since the last
    /// failure, the rejecting check instead transitions to half-open and
    /// that same call goes through as the probe.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error,
    {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.total_requests += 1;

            if inner.state == CircuitState::Open {
                if self.should_attempt_reset(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                } else {
                    inner.rejected_requests += 1;
                    tracing::warn!(breaker = %self.name, "circuit open, request rejected");
                    return Err(CircuitError::Open(self.name.clone()));
                }
            }
        }

        match f() {
            Ok(value) => {
                let mut inner = self.inner.lock().unwrap();
                inner.successful_requests += 1;
                self.on_success(&mut inner);
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().unwrap();
                inner.failed_requests += 1;
                self.on_failure(&mut inner);
                Err(CircuitError::Inner(err))
            }
        }
    }

    fn should_attempt_reset(&self, inner: &BreakerInner) -> bool {
        match inner.last_failure_time {
            Some(at) => at.elapsed() >= self.config.recovery_timeout,
            None => true,
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        tracing::info!(
            breaker = %self.name,
            from = ?inner.state,
            to = ?next,
            "circuit state change"
        );
        inner.state = next;
        inner.state_changes += 1;
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::HalfOpen {
            self.transition(inner, CircuitState::Closed);
            inner.failure_count = 0;
        } else {
            // One success only chips at a failure history, it does not
            // erase it.
            inner.failure_count = inner.failure_count.saturating_sub(1);
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner) {
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            // A single failed probe is enough to reopen.
            self.transition(inner, CircuitState::Open);
        } else if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            tracing::error!(
                breaker = %self.name,
                threshold = self.config.failure_threshold,
                "failure threshold reached, opening circuit"
            );
            self.transition(inner, CircuitState::Open);
        }
    }

    /// Manual override back to closed, e.g. from an operations endpoint.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        tracing::info!(breaker = %self.name, "circuit manually reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().unwrap();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            total_requests: inner.total_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            rejected_requests: inner.rejected_requests,
            state_changes: inner.state_changes,
        }
    }
}

/// Registry of breakers keyed by dependency name.
///
/// Every caller referencing the same name shares one state machine,
/// which is what makes the breaker meaningful across independently
/// constructed clients within a process. Owned by the composition root
/// rather than hidden module state.
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
            default_config,
        }
    }

    /// Get or create the breaker for a dependency.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config)))
            .clone()
    }

    /// Get or create with a config overriding the registry default.
    /// The override only applies if the breaker does not exist yet.
    pub fn get_or_create_with_config(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Stats for every registered breaker.
    pub fn all_stats(&self) -> Vec<(String, BreakerStats)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Force every registered breaker back to closed.
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
