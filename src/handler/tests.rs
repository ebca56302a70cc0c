//! Tests for the error handler drivers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rstest::{fixture, rstest};
use tokio::{sync::oneshot, time::Instant};

use super::*;
use crate::{
    exception::{ExceptionPolicy, ExceptionPolicyBuilder},
    failure::{FailureType, PANIC_TYPE},
    redelivery::RedeliveryOverrides,
    scheduler::{Rejected, ScheduleError},
};

/// Fails the first `failures` invocations.
struct Flaky {
    kind: FailureType,
    failures: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(kind: &FailureType, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            kind: kind.clone(),
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Stage for Flaky {
    async fn process(&self, _exchange: &mut Exchange) -> Result<(), Failure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(Failure::new(self.kind.clone(), format!("call {call} failed")));
        }
        Ok(())
    }
}

struct Panicky;

#[async_trait]
impl Stage for Panicky {
    async fn process(&self, _exchange: &mut Exchange) -> Result<(), Failure> {
        panic!("stage exploded")
    }
}

struct Refusing;

impl Scheduler for Refusing {
    fn schedule(&self, _delay: Duration, task: ScheduledTask) -> Result<(), Rejected> {
        Err(Rejected {
            error: ScheduleError::ShutDown,
            task,
        })
    }
}

#[fixture]
fn io() -> FailureType { FailureType::root("IoError") }

fn retrying(kind: &FailureType, max: i32, delay: Duration) -> ExceptionPolicyBuilder {
    ExceptionPolicy::builder("retry")
        .exception(kind.clone())
        .redelivery(
            RedeliveryOverrides::default()
                .maximum_redeliveries(max)
                .redelivery_delay(delay),
        )
}

fn async_retrying(kind: &FailureType, max: i32, delay: Duration) -> ExceptionPolicyBuilder {
    ExceptionPolicy::builder("retry-async")
        .exception(kind.clone())
        .redelivery(
            RedeliveryOverrides::default()
                .maximum_redeliveries(max)
                .redelivery_delay(delay)
                .async_delayed_redelivery(true),
        )
}

async fn wait_for_pending(handler: &ErrorHandler) {
    while handler.pending_redeliveries() == 0 {
        tokio::task::yield_now().await;
    }
}

#[rstest]
#[tokio::test]
async fn success_passes_through(io: FailureType) {
    let stage = Flaky::new(&io, 0);
    let handler = ErrorHandler::builder(Arc::clone(&stage))
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("ok");

    let outcome = handler.process(&mut exchange).await;

    assert_eq!(outcome.ok(), Some(Disposition::Completed));
    assert_eq!(stage.calls(), 1);
    assert_eq!(exchange.header(crate::exchange::headers::REDELIVERED), None);
    assert_eq!(handler.stats(), StatsSnapshot::default());
}

#[rstest]
#[tokio::test]
async fn unmatched_failure_propagates(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(retrying(&FailureType::root("Other"), 3, Duration::ZERO))
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x");

    let (outcome, state) = handler.process_with_state(&mut exchange).await;

    let failure = outcome.expect_err("failure propagates");
    assert_eq!(failure.kind(), &io);
    assert!(exchange.is_failed());
    assert_eq!(state.state(), EpisodeState::Propagated);
    assert!(state.current_policy().is_none());
    assert_eq!(handler.stats().propagated, 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn inline_redelivery_waits_between_attempts(io: FailureType) {
    let stage = Flaky::new(&io, 2);
    let handler = ErrorHandler::builder(Arc::clone(&stage))
        .exception_policy(retrying(&io, 3, Duration::from_millis(500)))
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x");
    let start = Instant::now();

    let (outcome, state) = handler.process_with_state(&mut exchange).await;

    assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 2 }));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(state.attempt_count(), 2);
    assert_eq!(state.last_computed_delay(), Duration::from_millis(500));
    assert_eq!(stage.calls(), 3);
    assert_eq!(handler.pending_redeliveries(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn async_redelivery_through_process(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(async_retrying(&io, 2, Duration::from_secs(2)))
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x");
    let start = Instant::now();

    let outcome = handler.process(&mut exchange).await;

    assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 1 }));
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn refused_schedule_falls_back_to_inline_wait(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(async_retrying(&io, 2, Duration::from_secs(1)))
        .scheduler(Arc::new(Refusing))
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x");
    let start = Instant::now();

    let outcome = handler.process(&mut exchange).await;

    assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 1 }));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn submit_parks_async_redelivery(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(async_retrying(&io, 2, Duration::from_secs(5)))
        .build()
        .expect("handler");
    let (tx, rx) = oneshot::channel();

    let submitted = handler
        .submit(Exchange::new("x"), move |completion| {
            let _ = tx.send(completion);
        })
        .await;

    assert_eq!(submitted, Submitted::Pending);
    assert_eq!(handler.pending_redeliveries(), 1);
    let completion = rx.await.expect("completion");
    assert_eq!(
        completion.outcome.ok(),
        Some(Disposition::Recovered { redeliveries: 1 })
    );
    assert_eq!(completion.exchange.header("RedeliveryCounter"), Some("1"));
    assert_eq!(handler.pending_redeliveries(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn submit_with_refusing_scheduler_completes_inline(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(async_retrying(&io, 2, Duration::from_secs(1)))
        .scheduler(Arc::new(Refusing))
        .build()
        .expect("handler");
    let (tx, mut rx) = oneshot::channel();

    let submitted = handler
        .submit(Exchange::new("x"), move |completion| {
            let _ = tx.send(completion);
        })
        .await;

    assert_eq!(submitted, Submitted::Completed);
    let completion = rx.try_recv().expect("callback already ran");
    assert!(completion.outcome.is_ok());
}

#[rstest]
#[tokio::test]
async fn submit_without_wait_completes_immediately(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .build()
        .expect("handler");
    let (tx, mut rx) = oneshot::channel();

    let submitted = handler
        .submit(Exchange::new("x"), move |completion| {
            let _ = tx.send(completion);
        })
        .await;

    assert_eq!(submitted, Submitted::Completed);
    let completion = rx.try_recv().expect("callback ran");
    assert!(completion.outcome.is_err());
    assert!(completion.exchange.is_failed());
}

#[rstest]
#[tokio::test]
async fn panicking_callback_is_contained(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 0))
        .build()
        .expect("handler");
    let submitted = handler
        .submit(Exchange::new("x"), |_| panic!("callback exploded"))
        .await;
    assert_eq!(submitted, Submitted::Completed);
}

#[rstest]
#[case::forbidden(false)]
#[case::allowed(true)]
#[tokio::test(start_paused = true)]
async fn stop_during_wait(io: FailureType, #[case] allowed: bool) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(
            ExceptionPolicy::builder("retry").exception(io.clone()).redelivery(
                RedeliveryOverrides::default()
                    .maximum_redeliveries(3)
                    .redelivery_delay(Duration::from_secs(10))
                    .allow_redelivery_while_stopping(allowed),
            ),
        )
        .build()
        .expect("handler");
    let start = Instant::now();
    let running = handler.clone();
    let task = tokio::spawn(async move {
        let mut exchange = Exchange::new("x");
        running.process(&mut exchange).await
    });

    wait_for_pending(&handler).await;
    handler.stop();
    let outcome = task.await.expect("join");

    if allowed {
        assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 1 }));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    } else {
        let failure = outcome.expect_err("abandoned");
        assert_eq!(failure.kind(), &io);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(handler.stats().propagated, 1);
    }
    assert_eq!(handler.pending_redeliveries(), 0);
}

#[rstest]
#[tokio::test]
async fn stopped_handler_does_not_start_forbidden_redelivery(io: FailureType) {
    let stage = Flaky::new(&io, 1);
    let handler = ErrorHandler::builder(Arc::clone(&stage))
        .exception_policy(
            ExceptionPolicy::builder("retry").exception(io.clone()).redelivery(
                RedeliveryOverrides::default()
                    .maximum_redeliveries(3)
                    .allow_redelivery_while_stopping(false),
            ),
        )
        .build()
        .expect("handler");
    handler.stop();

    let outcome = handler.process(&mut Exchange::new("x")).await;

    assert!(outcome.is_err());
    assert_eq!(stage.calls(), 1);
}

#[tokio::test]
async fn stage_panic_becomes_failure() {
    let handler = ErrorHandler::builder(Panicky)
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x");

    let failure = handler
        .process(&mut exchange)
        .await
        .expect_err("panic propagates as failure");

    assert!(failure.kind().is_named(PANIC_TYPE));
    assert!(failure.message().contains("stage exploded"));
}

#[rstest]
#[tokio::test]
async fn exchange_route_scopes_lookup(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(
            retrying(&io, 0, Duration::ZERO)
                .route_scope("orders")
                .handled(crate::predicate::constant(true)),
        )
        .build()
        .expect("handler");

    let mut routed = Exchange::new("x").with_route_id("orders");
    assert_eq!(handler.process(&mut routed).await.ok(), Some(Disposition::Handled));
    assert_eq!(routed.failure_route_id(), Some("orders"));

    let mut unrouted = Exchange::new("y");
    assert!(handler.process(&mut unrouted).await.is_err());
}

#[rstest]
#[tokio::test]
async fn handler_route_overrides_exchange_route(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .route_id("billing")
        .build()
        .expect("handler");
    let mut exchange = Exchange::new("x").with_route_id("orders");
    let _ = handler.process(&mut exchange).await;
    assert_eq!(exchange.route_id(), Some("orders"));
    assert_eq!(
        handler.shared.route_scope(&exchange).as_deref(),
        Some("billing")
    );
    assert_eq!(handler.shared.route_label(&Exchange::new("z")), "billing");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_parked_episodes(io: FailureType) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(async_retrying(&io, 2, Duration::from_secs(30)))
        .build()
        .expect("handler");
    let (tx, rx) = oneshot::channel();
    let submitted = handler
        .submit(Exchange::new("x"), move |completion| {
            let _ = tx.send(completion.outcome.is_ok());
        })
        .await;
    assert_eq!(submitted, Submitted::Pending);
    assert_eq!(handler.in_flight(), 1);

    handler.shutdown().await;

    assert_eq!(handler.in_flight(), 0);
    assert!(rx.await.expect("completion"));
}

#[test]
fn duplicate_named_policy_is_rejected() {
    let result = ErrorHandler::builder(Panicky)
        .redelivery_policy("slow", RedeliveryPolicy::default())
        .redelivery_policy("slow", RedeliveryPolicy::default())
        .build();
    assert!(matches!(
        result,
        Err(crate::error::ConfigError::DuplicateRedeliveryPolicy(name)) if name == "slow"
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn refused_schedules_do_not_nest(io: FailureType) {
    const FAILURES: usize = 10_000;
    let stage = Flaky::new(&io, FAILURES);
    let handler = ErrorHandler::builder(Arc::clone(&stage))
        .exception_policy(async_retrying(&io, -1, Duration::ZERO))
        .scheduler(Arc::new(Refusing))
        .build()
        .expect("handler");
    let (tx, mut rx) = oneshot::channel();

    let submitted = handler
        .submit(Exchange::new("x"), move |completion| {
            let _ = tx.send(completion);
        })
        .await;

    assert_eq!(submitted, Submitted::Completed);
    let completion = rx.try_recv().expect("callback already ran");
    assert_eq!(
        completion.outcome.ok(),
        Some(Disposition::Recovered {
            redeliveries: u32::try_from(FAILURES).expect("fits")
        })
    );
    assert_eq!(stage.calls(), FAILURES + 1);
    assert_eq!(handler.pending_redeliveries(), 0);
}

#[rstest]
#[case::inline(false)]
#[case::scheduled(true)]
#[tokio::test(start_paused = true)]
async fn stopped_wait_stays_pending_until_it_elapses(io: FailureType, #[case] scheduled: bool) {
    let handler = ErrorHandler::builder(Flaky::new(&io, 1))
        .exception_policy(
            ExceptionPolicy::builder("retry").exception(io.clone()).redelivery(
                RedeliveryOverrides::default()
                    .maximum_redeliveries(1)
                    .redelivery_delay(Duration::from_secs(10))
                    .async_delayed_redelivery(scheduled)
                    .allow_redelivery_while_stopping(true),
            ),
        )
        .build()
        .expect("handler");
    let running = handler.clone();
    let task = tokio::spawn(async move {
        let mut exchange = Exchange::new("x");
        running.process(&mut exchange).await
    });

    wait_for_pending(&handler).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    handler.stop();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!task.is_finished());
    assert_eq!(handler.pending_redeliveries(), 1);

    let outcome = task.await.expect("join");
    assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 1 }));
    assert_eq!(handler.pending_redeliveries(), 0);
}

#[rstest]
#[tokio::test]
async fn default_policy_does_not_redeliver_unmatched_failures(io: FailureType) {
    let stage = Flaky::new(&io, 1);
    let handler = ErrorHandler::builder(Arc::clone(&stage))
        .default_redelivery_policy(RedeliveryPolicy::default().maximum_redeliveries(5))
        .build()
        .expect("handler");

    let outcome = handler.process(&mut Exchange::new("x")).await;

    assert!(outcome.is_err());
    assert_eq!(stage.calls(), 1);
}
