//! Circuit Breaker Tests
//! State machine edges, failure windowing and admin overrides on virtual time

mod common;

use common::*;
use gateway_resilience::gateway::GatewayError;
use gateway_resilience::resilience::{
    observer_fn, CircuitConfig, CircuitState, StateChangeObserver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{advance, Instant};

#[cfg(test)]
mod state_machine_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_without_invoking_operation() {
        for threshold in [1u32, 2, 5] {
            let breaker = new_breaker(CircuitConfig::default().with_failure_threshold(threshold));
            let calls = AtomicUsize::new(0);

            for _ in 0..threshold {
                let err = call_failing(&breaker, &calls).await.unwrap_err();
                assert!(!err.is_circuit_open());
            }
            assert_eq!(breaker.state(), CircuitState::Open);

            let err = call_failing(&breaker, &calls).await.unwrap_err();
            assert!(err.is_circuit_open());
            assert_eq!(calls.load(Ordering::SeqCst), threshold as usize);

            let stats = breaker.stats();
            assert_eq!(stats.rejected_requests, 1);
            assert_eq!(stats.failures, threshold as u64);
            assert_eq!(stats.total_requests, threshold as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_error_is_returned_unchanged() {
        let breaker = new_breaker(CircuitConfig::default());

        let err = breaker
            .execute(|| async { Err::<(), _>(GatewayError::RateLimited) })
            .await
            .unwrap_err();

        assert_eq!(err.into_operation_error(), Some(GatewayError::RateLimited));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_exactly_at_reset_timeout() {
        let breaker = new_breaker(CircuitConfig::default().with_failure_threshold(1));
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        advance(Duration::from_millis(59_999)).await;
        match call_succeeding(&breaker, &calls).await {
            Err(gateway_resilience::resilience::BreakerError::CircuitOpen(open)) => {
                assert_eq!(open.retry_after_ms, 1);
                assert_eq!(open.service_name, "sms-gateway");
                assert_eq!(open.failure_count, 1);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_millis(1)).await;
        assert_eq!(call_succeeding(&breaker, &calls).await.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_discards_progress() {
        let (observer, seen) = recording_observer();
        let breaker = new_breaker(
            CircuitConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(3)
                .with_observer(observer),
        );
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err();
        advance(Duration::from_secs(60)).await;

        call_succeeding(&breaker, &calls).await.unwrap();
        call_succeeding(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.stats().consecutive_successes, 2);

        let err = call_failing(&breaker, &calls).await.unwrap_err();
        assert!(!err.is_circuit_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().consecutive_successes, 0);

        // Fresh failure restarts the reset timer.
        let err = call_succeeding(&breaker, &calls).await.unwrap_err();
        assert!(err.is_circuit_open());

        advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            call_succeeding(&breaker, &calls).await.unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failures_in_window, 0);

        assert_eq!(
            transitions(&seen),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_trip_probe_and_recover() {
        let breaker = new_breaker(CircuitConfig::default());
        let failed = AtomicUsize::new(0);
        let succeeded = AtomicUsize::new(0);

        for _ in 0..5 {
            call_failing(&breaker, &failed).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let started = Instant::now();
        let err = call_succeeding(&breaker, &succeeded).await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::ZERO);
        match err {
            gateway_resilience::resilience::BreakerError::CircuitOpen(open) => {
                assert_eq!(open.retry_after_ms, 60_000);
                assert_eq!(open.failure_count, 5);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        advance(Duration::from_millis(60_001)).await;
        call_succeeding(&breaker, &succeeded).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        call_succeeding(&breaker, &succeeded).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        call_succeeding(&breaker, &succeeded).await.unwrap();
        assert_eq!(failed.load(Ordering::SeqCst), 5);
        assert_eq!(succeeded.load(Ordering::SeqCst), 3);

        let stats = breaker.stats();
        assert_eq!(stats.total_requests, 8);
        assert_eq!(stats.rejected_requests, 1);
        assert_eq!(stats.successes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_open_does_not_transition() {
        let (observer, seen) = recording_observer();
        let breaker = new_breaker(
            CircuitConfig::default()
                .with_failure_threshold(1)
                .with_observer(observer),
        );
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<()>();

        let slow = breaker.execute(|| async move {
            let _ = gate.await;
            Err::<(), _>(GatewayError::Timeout)
        });
        let fast = async {
            call_failing(&breaker, &calls).await.unwrap_err();
            assert_eq!(breaker.state(), CircuitState::Open);
            release.send(()).unwrap();
        };

        let (slow_result, ()) = tokio::join!(slow, fast);

        assert!(!slow_result.unwrap_err().is_circuit_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().failures, 2);
        assert_eq!(transitions(&seen), vec![(CircuitState::Closed, CircuitState::Open)]);
    }
}

#[cfg(test)]
mod window_tests {
    use super::*;

    fn windowed(threshold: u32) -> CircuitConfig {
        CircuitConfig::default()
            .with_failure_threshold(threshold)
            .with_failure_window(Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_failures_every_100ms_threshold_three() {
        let breaker = new_breaker(windowed(3));
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err(); // t=0
        advance(Duration::from_millis(100)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=100
        assert_eq!(breaker.state(), CircuitState::Closed);
        advance(Duration::from_millis(100)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=200
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().failures_in_window, 3);

        advance(Duration::from_millis(100)).await;
        assert!(call_failing(&breaker, &calls).await.unwrap_err().is_circuit_open()); // t=300
        advance(Duration::from_millis(100)).await;
        assert!(call_failing(&breaker, &calls).await.unwrap_err().is_circuit_open()); // t=400
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_old_failures_age_out() {
        let breaker = new_breaker(windowed(4));
        let calls = AtomicUsize::new(0);

        for step in 0..5 {
            if step > 0 {
                advance(Duration::from_millis(100)).await;
            }
            call_failing(&breaker, &calls).await.unwrap_err();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }

        // t=400: only 200, 300 and 400 are within 250ms.
        let stats = breaker.stats();
        assert_eq!(stats.failures_in_window, 3);
        assert_eq!(stats.failures, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary_is_inclusive() {
        let breaker = new_breaker(windowed(3));
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err(); // t=0
        advance(Duration::from_millis(125)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=125
        advance(Duration::from_millis(125)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=250, t=0 is exactly 250ms old

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_just_past_window_is_dropped() {
        let breaker = new_breaker(windowed(3));
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err(); // t=0
        advance(Duration::from_millis(125)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=125
        advance(Duration::from_millis(126)).await;
        call_failing(&breaker, &calls).await.unwrap_err(); // t=251

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failures_in_window, 2);
    }
}

#[cfg(test)]
mod probe_tests {
    use super::*;

    async fn open_and_wait(config: CircuitConfig) -> gateway_resilience::CircuitBreaker {
        let breaker = new_breaker(config.with_failure_threshold(1));
        call_failing(&breaker, &AtomicUsize::new(0)).await.unwrap_err();
        advance(Duration::from_secs(60)).await;
        breaker
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_limit_rejects_concurrent_calls() {
        let breaker = open_and_wait(CircuitConfig::default().with_half_open_max_probes(1)).await;
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<()>();

        let probe = breaker.execute(|| async move {
            let _ = gate.await;
            Ok::<_, GatewayError>("probe")
        });
        let second = async {
            let err = call_succeeding(&breaker, &calls).await.unwrap_err();
            assert!(err.is_circuit_open());
            release.send(()).unwrap();
        };

        let (probe_result, ()) = tokio::join!(probe, second);
        assert_eq!(probe_result.unwrap(), "probe");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Slot freed once the probe completed.
        call_succeeding(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_probes_by_default() {
        let breaker = open_and_wait(CircuitConfig::default()).await;
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<()>();

        let probe = breaker.execute(|| async move {
            let _ = gate.await;
            Ok::<_, GatewayError>("probe")
        });
        let second = async {
            call_succeeding(&breaker, &calls).await.unwrap();
            release.send(()).unwrap();
        };

        let (probe_result, ()) = tokio::join!(probe, second);
        assert!(probe_result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let breaker = open_and_wait(CircuitConfig::default().with_half_open_max_probes(1)).await;
        let calls = AtomicUsize::new(0);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(std::future::pending::<Result<(), GatewayError>>),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        call_succeeding(&breaker, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod observer_and_admin_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_failing_observers_never_reach_caller() {
        let (recorder, seen) = recording_observer();
        let breaker = new_breaker(
            CircuitConfig::default()
                .with_failure_threshold(1)
                .with_observer(observer_fn(|_, _, _| anyhow::bail!("alerting backend down")))
                .with_observer(observer_fn(|_, _, _| panic!("observer bug")))
                .with_observer(recorder),
        );
        let calls = AtomicUsize::new(0);

        let err = call_failing(&breaker, &calls).await.unwrap_err();
        assert!(!err.is_circuit_open());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(transitions(&seen), vec![(CircuitState::Closed, CircuitState::Open)]);
        assert_eq!(seen.lock().unwrap()[0].0, "sms-gateway");
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_open_and_reset() {
        let (observer, seen) = recording_observer();
        let breaker = new_breaker(CircuitConfig::default().with_observer(observer));
        let calls = AtomicUsize::new(0);

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        match call_succeeding(&breaker, &calls).await.unwrap_err() {
            gateway_resilience::resilience::BreakerError::CircuitOpen(open) => {
                assert_eq!(open.retry_after_ms, 60_000);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        call_succeeding(&breaker, &calls).await.unwrap();

        // Already closed: no transition to report.
        breaker.reset();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            transitions(&seen),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_failure_history_keeps_counters() {
        let breaker = new_breaker(CircuitConfig::default().with_failure_threshold(3));
        let calls = AtomicUsize::new(0);

        call_failing(&breaker, &calls).await.unwrap_err();
        call_failing(&breaker, &calls).await.unwrap_err();
        breaker.reset();

        let stats = breaker.stats();
        assert_eq!(stats.failures_in_window, 0);
        assert_eq!(stats.failures, 2);
        assert!(stats.last_failure_at.is_none());

        // Two more failures are not enough after the reset.
        call_failing(&breaker, &calls).await.unwrap_err();
        call_failing(&breaker, &calls).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_exactly_once() {
        let (observer, seen) = recording_observer();
        let breaker = new_breaker(CircuitConfig::default().with_observer(observer));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let breaker = breaker.clone();
            let calls = Arc::clone(&calls);
            set.spawn(async move { call_failing(&breaker, &calls).await });
        }

        let mut rejected = 0;
        while let Some(result) = set.join_next().await {
            let err = result.expect("Task panicked").unwrap_err();
            if err.is_circuit_open() {
                rejected += 1;
            }
        }

        let stats = breaker.stats();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(stats.total_requests + stats.rejected_requests, 50);
        assert_eq!(stats.rejected_requests, rejected);
        assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.total_requests);
        assert_eq!(transitions(&seen), vec![(CircuitState::Closed, CircuitState::Open)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_during_slow_notification_is_delivered_in_order() {
        let entered = Arc::new(std::sync::Barrier::new(2));
        let release = Arc::new(std::sync::Barrier::new(2));
        let (recorder, seen) = recording_observer();

        let slow = {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            observer_fn(move |service, from, to| {
                if to == CircuitState::Open {
                    entered.wait();
                    release.wait();
                }
                recorder.on_state_change(service, from, to)
            })
        };
        let breaker = new_breaker(
            CircuitConfig::default()
                .with_failure_threshold(1)
                .with_observer(slow),
        );

        let trip = {
            let breaker = breaker.clone();
            tokio::spawn(async move {
                let calls = AtomicUsize::new(0);
                call_failing(&breaker, &calls).await
            })
        };

        // Open is committed and its notification is stuck in the observer.
        tokio::task::spawn_blocking(move || {
            entered.wait();
        })
        .await
        .unwrap();

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);

        tokio::task::spawn_blocking(move || {
            release.wait();
        })
        .await
        .unwrap();
        trip.await.expect("Task panicked").unwrap_err();

        assert_eq!(
            transitions(&seen),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
        let last_seen = transitions(&seen).last().map(|(_, to)| *to);
        assert_eq!(last_seen, Some(breaker.state()));
    }
}

