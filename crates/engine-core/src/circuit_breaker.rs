use crate::event_bus::bus::EventBus;
use chrono::Utc;
use model::{events::SyncEvent, execution::circuit::CircuitState};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

pub const SIS_DEPENDENCY: &str = "sis";
pub const DATASTORE_DEPENDENCY: &str = "datastore";

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit for '{dependency}' is open (retry in {retry_after:?})")]
pub struct CircuitOpen {
    pub dependency: String,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<chrono::DateTime<Utc>>,
    probe_in_flight: bool,
}

/// Consecutive-failure breaker guarding one dependency.
///
/// Callers take a [`CircuitPermit`] before each attempt and settle it with the
/// outcome. Once the breaker opens, calls fail fast until the cooldown elapses;
/// the first caller after that runs alone as the half-open probe.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                probe_in_flight: false,
            }),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            dependency: self.dependency.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at_wall,
        }
    }

    /// Asks for permission to call the dependency.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CircuitPermit, CircuitOpen> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Ok(CircuitPermit::new(self.clone(), false)),
            CircuitState::HalfOpen => Err(self.open_error(Duration::ZERO)),
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or_else(Instant::now);
                let ready_at = opened_at + self.config.cooldown;
                let now = Instant::now();
                if now < ready_at || state.probe_in_flight {
                    return Err(self.open_error(ready_at.saturating_duration_since(now)));
                }

                state.probe_in_flight = true;
                self.transition(&mut state, CircuitState::HalfOpen);
                Ok(CircuitPermit::new(self.clone(), true))
            }
        }
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpen {
        CircuitOpen {
            dependency: self.dependency.clone(),
            retry_after,
        }
    }

    fn settle(&self, outcome: Outcome, probe: bool) {
        let mut state = self.state.lock();
        if probe {
            state.probe_in_flight = false;
        }

        match outcome {
            Outcome::Success => {
                // Only the half-open trial call may close an open circuit. A
                // call admitted before the trip proves nothing about recovery.
                if state.state != CircuitState::Closed && !probe {
                    return;
                }
                state.consecutive_failures = 0;
                if state.state != CircuitState::Closed {
                    state.opened_at = None;
                    state.opened_at_wall = None;
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            Outcome::Failure => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let trip = match state.state {
                    CircuitState::HalfOpen => true,
                    CircuitState::Closed => {
                        state.consecutive_failures >= self.config.failure_threshold
                    }
                    CircuitState::Open => false,
                };
                if trip {
                    state.opened_at = Some(Instant::now());
                    state.opened_at_wall = Some(Utc::now());
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            Outcome::Neutral => {
                // A probe that ended neutral proves nothing; reopen with the old clock.
                if probe && state.state == CircuitState::HalfOpen {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;

        match to {
            CircuitState::Open => warn!(
                dependency = %self.dependency,
                %from,
                consecutive_failures = state.consecutive_failures,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            _ => info!(
                dependency = %self.dependency,
                %from,
                %to,
                "Circuit state changed"
            ),
        }

        if let Some(events) = &self.events {
            events.publish(SyncEvent::CircuitStateChanged {
                dependency: self.dependency.clone(),
                from,
                to,
                consecutive_failures: state.consecutive_failures,
                timestamp: Utc::now(),
            });
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Neutral,
}

/// Proof that the breaker admitted a call. Dropping it unsettled while
/// probing counts as a failure.
#[derive(Debug)]
#[must_use = "settle the permit with the call outcome"]
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.finish(Outcome::Success);
    }

    pub fn failure(mut self) {
        self.finish(Outcome::Failure);
    }

    /// The call failed for a reason that says nothing about the dependency's health.
    pub fn neutral(mut self) {
        self.finish(Outcome::Neutral);
    }

    fn finish(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(outcome, self.probe);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.finish(Outcome::Failure);
        }
    }
}

/// One breaker per named dependency, shared by every worker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    events: EventBus,
    breakers: Arc<Mutex<BTreeMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            breakers: Arc::default(),
        }
    }

    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(
                    CircuitBreaker::new(dependency, self.config).with_events(self.events.clone()),
                )
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers
            .lock()
            .values()
            .map(|breaker| breaker.snapshot())
            .collect()
    }
}
