//! Circuit Breaker Implementation
//! Fails fast while a gateway is known to be down, probes it lazily once the
//! reset timeout has passed

use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::context::CallContext;
use super::error::{BreakerError, CircuitOpenError};
use super::observer::notify_all;
use super::state::{CircuitConfig, CircuitRecord, CircuitSnapshot, CircuitState, CircuitStats};
use crate::observability::metrics::get_metrics;

/// Shared per-service state. Owned by the registry, borrowed by breakers.
pub(crate) struct Circuit {
    name: String,
    config: CircuitConfig,
    record: Mutex<CircuitRecord>,
    notifications: Mutex<Notifications>,
}

/// Transitions waiting to be delivered to observers, in commit order.
/// Only one thread drains at a time; the others enqueue and return.
#[derive(Default)]
struct Notifications {
    pending: VecDeque<(CircuitState, CircuitState)>,
    draining: bool,
}

impl Circuit {
    pub(crate) fn new(name: String, config: CircuitConfig) -> Self {
        Self {
            name,
            config,
            record: Mutex::new(CircuitRecord::new()),
            notifications: Mutex::new(Notifications::default()),
        }
    }

    pub(crate) fn config(&self) -> &CircuitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notifications(&self) -> MutexGuard<'_, Notifications> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the record to `to`. Must be called with the record lock held so
    /// the notification is queued in the same order the changes commit.
    fn transition(&self, record: &mut CircuitRecord, to: CircuitState) -> Option<Transition> {
        let failures_in_window = record.failure_timestamps.len();
        let from = record.transition(to)?;
        self.notifications().pending.push_back((from, to));
        Some(Transition {
            from,
            to,
            failures_in_window,
        })
    }

    /// Deliver queued transitions to observers. Called without the record
    /// lock. If another thread is already draining, it delivers ours too.
    fn deliver_notifications(&self) {
        {
            let mut queue = self.notifications();
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        loop {
            let (from, to) = {
                let mut queue = self.notifications();
                match queue.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            notify_all(&self.config.observers, &self.name, from, to);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Error the caller chose not to count against the circuit.
    Ignored,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Ignored => "ignored",
        }
    }
}

struct Transition {
    from: CircuitState,
    to: CircuitState,
    failures_in_window: usize,
}

/// Half-open probe slot held for the duration of one admitted call.
/// Released on completion, or on drop if the call was cancelled.
struct ProbeSlot<'a> {
    circuit: &'a Circuit,
    epoch: Option<u64>,
}

impl ProbeSlot<'_> {
    fn release(&mut self, record: &mut CircuitRecord) {
        if let Some(epoch) = self.epoch.take() {
            if record.state == CircuitState::HalfOpen && record.half_open_epoch == epoch {
                record.probes_in_flight = record.probes_in_flight.saturating_sub(1);
            }
        }
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.epoch.is_some() {
            let circuit = self.circuit;
            let mut record = circuit.lock();
            self.release(&mut record);
        }
    }
}

/// Handle to one service's circuit. Cheap to clone; all clones share the
/// same record.
#[derive(Clone)]
pub struct CircuitBreaker {
    circuit: Arc<Circuit>,
}

impl CircuitBreaker {
    pub(crate) fn from_circuit(circuit: Arc<Circuit>) -> Self {
        Self { circuit }
    }

    pub fn name(&self) -> &str {
        &self.circuit.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.circuit.config
    }

    pub fn state(&self) -> CircuitState {
        self.circuit.lock().state
    }

    pub fn stats(&self) -> CircuitStats {
        self.circuit.lock().stats()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        CircuitSnapshot::capture(&self.circuit.lock(), now)
    }

    // =====================================================
    // EXECUTION
    // =====================================================

    /// Run `op` if the circuit admits it. Every error counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_context(&CallContext::default(), op).await
    }

    pub async fn execute_with_context<F, Fut, T, E>(
        &self,
        ctx: &CallContext,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(ctx, op, |_| true).await
    }

    /// Run `op`, recording only errors for which `counts_as_failure` returns
    /// true as circuit failures. Other errors are passed through and only
    /// count towards `total_requests`.
    ///
    /// No deadline is applied to `op`; wrap it in `tokio::time::timeout`
    /// inside the closure if the call needs one.
    pub async fn execute_classified<F, Fut, T, E, P>(
        &self,
        ctx: &CallContext,
        op: F,
        counts_as_failure: P,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let span = info_span!(
            "circuit_call",
            service = %self.circuit.name,
            operation = %ctx.operation,
            request_id = %ctx.request_id,
        );

        async move {
            let mut slot = match self.admit() {
                Ok(slot) => slot,
                Err(rejected) => return Err(BreakerError::CircuitOpen(rejected)),
            };

            let result = op().await;

            let outcome = match &result {
                Ok(_) => Outcome::Success,
                Err(e) if counts_as_failure(e) => Outcome::Failure,
                Err(_) => Outcome::Ignored,
            };
            self.record_outcome(&mut slot, outcome);

            result.map_err(BreakerError::Operation)
        }
        .instrument(span)
        .await
    }

    /// Admission check. Performs the lazy open -> half-open transition.
    fn admit(&self) -> Result<ProbeSlot<'_>, CircuitOpenError> {
        let circuit = &*self.circuit;
        let config = &circuit.config;
        let now = Instant::now();
        let mut transition = None;

        let admitted = {
            let mut record = circuit.lock();
            let state = record.state;
            match state {
                CircuitState::Closed => Ok(None),
                CircuitState::Open => {
                    let reset_elapsed = record
                        .last_failure_time
                        .map_or(true, |last| now.saturating_duration_since(last) >= config.reset_timeout);

                    if reset_elapsed {
                        transition = circuit.transition(&mut record, CircuitState::HalfOpen);
                        record.probes_in_flight += 1;
                        Ok(Some(record.half_open_epoch))
                    } else {
                        Err(Self::reject(&mut record, &circuit.name, config, now))
                    }
                }
                CircuitState::HalfOpen => {
                    let saturated = config
                        .half_open_max_probes
                        .is_some_and(|max| record.probes_in_flight >= max);

                    if saturated {
                        Err(Self::reject(&mut record, &circuit.name, config, now))
                    } else {
                        record.probes_in_flight += 1;
                        Ok(Some(record.half_open_epoch))
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.on_transition(transition);
        }

        match admitted {
            Ok(epoch) => Ok(ProbeSlot { circuit, epoch }),
            Err(rejected) => {
                debug!(
                    service = %circuit.name,
                    retry_after_ms = rejected.retry_after_ms,
                    failure_count = rejected.failure_count,
                    "Circuit open, call rejected"
                );
                if let Some(metrics) = get_metrics() {
                    metrics
                        .circuit_calls_total
                        .with_label_values(&[circuit.name.as_str(), "rejected"])
                        .inc();
                }
                Err(rejected)
            }
        }
    }

    fn reject(
        record: &mut CircuitRecord,
        name: &str,
        config: &CircuitConfig,
        now: Instant,
    ) -> CircuitOpenError {
        record.rejected_requests += 1;
        CircuitOpenError {
            service_name: name.to_string(),
            retry_after_ms: record.retry_after(now, config.reset_timeout).as_millis() as u64,
            failure_count: record.failure_timestamps.len(),
        }
    }

    fn record_outcome(&self, slot: &mut ProbeSlot<'_>, outcome: Outcome) {
        let circuit = &*self.circuit;
        let config = &circuit.config;
        let now = Instant::now();

        let transition = {
            let mut record = circuit.lock();
            slot.release(&mut record);
            record.total_requests += 1;

            let next = match outcome {
                Outcome::Success => {
                    record.successes += 1;
                    record.consecutive_successes = record.consecutive_successes.saturating_add(1);
                    record.last_success_time = Some(now);
                    record.last_success_at = Some(Utc::now());

                    (record.state == CircuitState::HalfOpen
                        && record.consecutive_successes >= config.success_threshold)
                        .then_some(CircuitState::Closed)
                }
                Outcome::Failure => {
                    record.failures += 1;
                    record.last_failure_time = Some(now);
                    record.last_failure_at = Some(Utc::now());
                    record.failure_timestamps.push_back(now);
                    record.prune_failures(now, config.failure_window);
                    record.consecutive_successes = 0;

                    let state = record.state;
                    match state {
                        CircuitState::Closed
                            if record.failure_timestamps.len() >= config.failure_threshold as usize =>
                        {
                            Some(CircuitState::Open)
                        }
                        CircuitState::HalfOpen => Some(CircuitState::Open),
                        _ => None,
                    }
                }
                Outcome::Ignored => None,
            };

            next.and_then(|to| circuit.transition(&mut record, to))
        };

        if let Some(metrics) = get_metrics() {
            metrics
                .circuit_calls_total
                .with_label_values(&[circuit.name.as_str(), outcome.as_str()])
                .inc();
        }

        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    fn on_transition(&self, transition: Transition) {
        let name = self.circuit.name.as_str();
        let Transition {
            from,
            to,
            failures_in_window,
        } = transition;

        match to {
            CircuitState::Open => warn!(
                service = name,
                from = from.as_str(),
                failures = failures_in_window,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                service = name,
                "Circuit breaker transitioning to half-open"
            ),
            CircuitState::Closed => info!(
                service = name,
                from = from.as_str(),
                "Circuit breaker closed after recovery"
            ),
        }

        self.circuit.deliver_notifications();
    }

    // =====================================================
    // ADMIN
    // =====================================================

    /// Force the circuit closed and forget its failure history. Cumulative
    /// counters are kept.
    pub fn reset(&self) {
        let transition = {
            let mut record = self.circuit.lock();
            let transition = self.circuit.transition(&mut record, CircuitState::Closed);
            record.failure_timestamps.clear();
            record.consecutive_successes = 0;
            record.last_failure_time = None;
            record.last_failure_at = None;
            transition
        };

        info!(service = %self.circuit.name, "Circuit breaker manually reset");

        if transition.is_some() {
            self.circuit.deliver_notifications();
        }
    }

    /// Force the circuit open, as if it had just failed. Used for
    /// maintenance windows.
    pub fn force_open(&self) {
        let now = Instant::now();
        let transition = {
            let mut record = self.circuit.lock();
            let transition = self.circuit.transition(&mut record, CircuitState::Open);
            record.last_failure_time = Some(now);
            record.last_failure_at = Some(Utc::now());
            transition
        };

        warn!(service = %self.circuit.name, "Circuit breaker manually forced open");

        if transition.is_some() {
            self.circuit.deliver_notifications();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.circuit.name)
            .field("config", &self.circuit.config)
            .finish()
    }
}
