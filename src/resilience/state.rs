//! Circuit State & Configuration
//! Per-service record mutated by the breaker under its lock

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::ConfigError;
use super::observer::StateChangeObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 = closed, 0.5 = half-open, 1 = open.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =====================================================
// CONFIG
// =====================================================

#[derive(Clone)]
pub struct CircuitConfig {
    /// Failures inside `failure_window` that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before an open circuit admits a probe.
    pub reset_timeout: Duration,
    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,
    pub failure_window: Duration,
    /// Concurrent probes admitted while half-open. `None` admits every call.
    pub half_open_max_probes: Option<u32>,
    pub observers: Vec<Arc<dyn StateChangeObserver>>,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_millis(60_000),
            success_threshold: 2,
            failure_window: Duration::from_millis(300_000),
            half_open_max_probes: None,
            observers: Vec::new(),
        }
    }
}

impl CircuitConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = Some(probes);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StateChangeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::NotPositive { field: "failure_threshold" });
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::NotPositive { field: "reset_timeout" });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::NotPositive { field: "success_threshold" });
        }
        if self.failure_window.is_zero() {
            return Err(ConfigError::NotPositive { field: "failure_window" });
        }
        if self.half_open_max_probes == Some(0) {
            return Err(ConfigError::NotPositive { field: "half_open_max_probes" });
        }
        Ok(())
    }
}

impl fmt::Debug for CircuitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("success_threshold", &self.success_threshold)
            .field("failure_window", &self.failure_window)
            .field("half_open_max_probes", &self.half_open_max_probes)
            .field("observers", &self.observers.len())
            .finish()
    }
}

// =====================================================
// RECORD
// =====================================================

#[derive(Debug)]
pub(crate) struct CircuitRecord {
    pub state: CircuitState,
    pub failure_timestamps: VecDeque<Instant>,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_successes: u32,
    pub last_failure_time: Option<Instant>,
    pub last_success_time: Option<Instant>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub rejected_requests: u64,
    /// Bumped on every entry into half-open; probe slots belong to one epoch.
    pub half_open_epoch: u64,
    pub probes_in_flight: u32,
}

impl CircuitRecord {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_timestamps: VecDeque::new(),
            successes: 0,
            failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_success_time: None,
            last_failure_at: None,
            last_success_at: None,
            total_requests: 0,
            rejected_requests: 0,
            half_open_epoch: 0,
            probes_in_flight: 0,
        }
    }

    /// Drop failures older than `window`. A failure exactly `window` old is kept.
    pub fn prune_failures(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failure_timestamps.front() {
            if now.saturating_duration_since(oldest) > window {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Move to `to`, applying entry side effects. Returns the previous state
    /// when a transition actually happened.
    pub fn transition(&mut self, to: CircuitState) -> Option<CircuitState> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        match to {
            CircuitState::HalfOpen => {
                self.consecutive_successes = 0;
                self.half_open_epoch += 1;
                self.probes_in_flight = 0;
            }
            CircuitState::Closed => {
                self.failure_timestamps.clear();
            }
            CircuitState::Open => {}
        }
        Some(from)
    }

    pub fn retry_after(&self, now: Instant, reset_timeout: Duration) -> Duration {
        match self.last_failure_time {
            Some(last) => reset_timeout.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            state: self.state,
            successes: self.successes,
            failures: self.failures,
            consecutive_successes: self.consecutive_successes,
            failures_in_window: self.failure_timestamps.len(),
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
        }
    }
}

// =====================================================
// SNAPSHOTS
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_successes: u32,
    pub failures_in_window: usize,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub stats: CircuitStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_failure_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_since_last_success_ms: Option<u64>,
}

impl CircuitSnapshot {
    pub(crate) fn capture(record: &CircuitRecord, now: Instant) -> Self {
        let since = |t: Option<Instant>| {
            t.map(|t| now.saturating_duration_since(t).as_millis() as u64)
        };
        Self {
            state: record.state,
            stats: record.stats(),
            time_since_last_failure_ms: since(record.last_failure_time),
            time_since_last_success_ms: since(record.last_success_time),
        }
    }
}
