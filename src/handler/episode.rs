//! The per-exchange redelivery state machine.
//!
//! An [`Episode`] lives from the moment an exchange enters the error handler
//! until it reaches a terminal [`EpisodeState`]. Each call to
//! [`Episode::step`] invokes the protected stage once and classifies the
//! result. Waiting between attempts is left to the caller, which is what lets
//! the same state machine run inline or parked on a scheduler.

use std::{sync::Arc, time::Duration};

use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, warn};

use super::{Disposition, EpisodeState, HandlerShared, log::log_at};
use crate::{
    exception::ExceptionPolicy,
    exchange::{Exchange, Message, headers},
    failure::{Failure, FailureType, PANIC_TYPE},
    hooks::{HookPoint, run_guarded},
    metrics,
    panic,
    stage::SharedStage,
};

/// Redelivery bookkeeping for one episode.
#[derive(Clone, Debug, Default)]
pub struct RedeliveryState {
    attempt_count: u32,
    current_policy: Option<Arc<ExceptionPolicy>>,
    last_computed_delay: Duration,
    exhausted: bool,
    state: EpisodeState,
}

impl RedeliveryState {
    /// Redeliveries started so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 { self.attempt_count }

    /// Policy that matched the most recent failure.
    #[must_use]
    pub fn current_policy(&self) -> Option<&Arc<ExceptionPolicy>> { self.current_policy.as_ref() }

    /// Delay chosen for the most recent redelivery.
    #[must_use]
    pub fn last_computed_delay(&self) -> Duration { self.last_computed_delay }

    /// Returns `true` once redeliveries ran out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool { self.exhausted }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EpisodeState { self.state }

    fn next_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }

    fn mark_exhausted(&mut self) { self.exhausted = true; }

    fn finish(&mut self, state: EpisodeState) {
        debug_assert!(!self.state.is_terminal(), "episode finished twice");
        self.state = state;
    }
}

/// What the driver must do after a step.
pub(super) enum Step {
    /// The episode is over.
    Done(Result<Disposition, Failure>),
    /// Wait `delay`, then step again.
    Wait(Duration),
}

pub(super) struct Episode {
    shared: Arc<HandlerShared>,
    state: RedeliveryState,
    stage_input: Message,
    last_failure: Option<Failure>,
    _in_flight: TaskTrackerToken,
}

impl Episode {
    pub(super) fn begin(shared: Arc<HandlerShared>, exchange: &mut Exchange) -> Self {
        if shared.capture_original {
            exchange.capture_original();
        }
        if exchange.route_id().is_none() {
            exchange.set_route_id(shared.route_id.clone());
        }
        Self {
            _in_flight: shared.tracker.token(),
            stage_input: exchange.message().clone(),
            state: RedeliveryState::default(),
            last_failure: None,
            shared,
        }
    }

    pub(super) fn state(&self) -> &RedeliveryState { &self.state }

    /// Whether the pending wait should run on the scheduler.
    pub(super) fn wants_async_wait(&self) -> bool {
        self.policy()
            .is_some_and(|p| p.redelivery().async_delayed_redelivery)
    }

    /// Whether a stop request may be ignored for the pending wait.
    pub(super) fn allows_redelivery_while_stopping(&self) -> bool {
        self.policy()
            .is_none_or(|p| p.redelivery().allow_redelivery_while_stopping)
    }

    fn policy(&self) -> Option<&ExceptionPolicy> { self.state.current_policy.as_deref() }

    /// Invoke the stage once and classify the result.
    pub(super) async fn step(&mut self, exchange: &mut Exchange) -> Step {
        match self.invoke(exchange).await {
            Ok(()) => Step::Done(Ok(self.succeeded(exchange))),
            Err(failure) => self.failed(exchange, failure).await,
        }
    }

    /// Give up a pending redelivery because the handler is stopping.
    pub(super) fn abandon(&mut self, exchange: &mut Exchange) -> Result<Disposition, Failure> {
        let failure = match self.last_failure.take() {
            Some(failure) => failure,
            None => Failure::new(
                FailureType::root("RedeliveryAbandoned"),
                "redelivery abandoned while stopping",
            ),
        };
        warn!(
            exchange = %exchange.id(),
            attempt = self.state.attempt_count,
            failure = %failure,
            "redelivery abandoned: handler is stopping"
        );
        exchange.set_failure(failure.clone());
        Err(self.propagate(failure))
    }

    async fn invoke(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        match panic::catch_async(self.shared.stage.process(exchange)).await {
            Ok(result) => result,
            Err(panic) => Err(Failure::new(FailureType::root(PANIC_TYPE), panic.to_string())),
        }
    }

    fn succeeded(&mut self, exchange: &Exchange) -> Disposition {
        let redeliveries = self.state.attempt_count;
        if redeliveries == 0 {
            return Disposition::Completed;
        }
        debug!(
            exchange = %exchange.id(),
            redeliveries,
            "redelivery succeeded"
        );
        self.last_failure = None;
        self.finish(EpisodeState::Recovered);
        Disposition::Recovered { redeliveries }
    }

    async fn failed(&mut self, exchange: &mut Exchange, failure: Failure) -> Step {
        self.shared.stats.failure();
        exchange.set_failure(failure.clone());

        let scope = self.shared.route_scope(exchange);
        let Some(policy) = self
            .shared
            .registry
            .find(scope.as_deref(), failure.kind(), exchange)
            .cloned()
        else {
            debug!(
                exchange = %exchange.id(),
                failure = %failure,
                "no exception policy matched; propagating"
            );
            return Step::Done(Err(self.propagate(failure)));
        };
        self.state.current_policy = Some(Arc::clone(&policy));

        policy.hooks().exception_occurred(exchange, &failure);
        let redelivery = policy.redelivery();

        if policy.is_continued(exchange) {
            if redelivery.log_continued {
                // Suppressed failures share the exhaustion level.
                log_at!(
                    redelivery.retries_exhausted_log_level,
                    exchange = %exchange.id(),
                    policy = policy.id(),
                    failure = %failure,
                    "failure continued"
                );
            }
            exchange.clear_redelivery_headers();
            exchange.suppress_failure(failure, scope);
            exchange.mark_continued();
            self.finish(EpisodeState::Continued);
            return Step::Done(Ok(Disposition::Continued));
        }

        if policy.is_handled(exchange) {
            if redelivery.log_handled {
                // Suppressed failures share the exhaustion level.
                log_at!(
                    redelivery.retries_exhausted_log_level,
                    exchange = %exchange.id(),
                    policy = policy.id(),
                    failure = %failure,
                    "failure handled"
                );
            }
            exchange.clear_redelivery_headers();
            exchange.suppress_failure(failure, scope);
            exchange.set_route_stop(true);
            self.finish(EpisodeState::Handled);
            return Step::Done(Ok(Disposition::Handled));
        }

        let exhausted =
            redelivery.is_exhausted(self.state.attempt_count) || !policy.should_retry(exchange);
        if !exhausted {
            if self.shared.is_stopping() && !redelivery.allow_redelivery_while_stopping {
                self.last_failure = Some(failure);
                return Step::Done(self.abandon(exchange));
            }
            return Step::Wait(self.prepare_redelivery(exchange, &policy, failure));
        }

        self.exhausted(exchange, &policy, failure, scope).await
    }

    fn prepare_redelivery(
        &mut self,
        exchange: &mut Exchange,
        policy: &ExceptionPolicy,
        failure: Failure,
    ) -> Duration {
        let redelivery = policy.redelivery();
        let attempt = self.state.next_attempt();
        let delay = match header_delay(exchange) {
            Some(delay) => {
                debug!(exchange = %exchange.id(), ?delay, "redelivery delay taken from header");
                delay
            }
            None => redelivery.compute_delay(attempt),
        };
        self.state.last_computed_delay = delay;

        exchange.take_failure();
        exchange.set_message(self.stage_input.clone());
        exchange.set_header(headers::REDELIVERED, true);
        exchange.set_header(headers::REDELIVERY_COUNTER, attempt);
        if redelivery.maximum_redeliveries >= 0 {
            exchange.set_header(headers::REDELIVERY_MAX_COUNTER, redelivery.maximum_redeliveries);
        }

        policy.hooks().redelivery(exchange, &failure);

        self.shared.stats.redelivery();
        metrics::inc_redeliveries(self.shared.route_label(exchange));
        if redelivery.should_log_attempt(attempt) {
            let cause = redelivery.log_retry_stack_trace.then(|| failure.chain());
            log_at!(
                redelivery.retry_attempted_log_level,
                exchange = %exchange.id(),
                policy = policy.id(),
                attempt,
                max = redelivery.maximum_redeliveries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                failure = %failure,
                cause = cause.as_deref(),
                "redelivery scheduled"
            );
        }
        self.last_failure = Some(failure);
        delay
    }

    async fn exhausted(
        &mut self,
        exchange: &mut Exchange,
        policy: &ExceptionPolicy,
        failure: Failure,
        scope: Option<Arc<str>>,
    ) -> Step {
        let redelivery = policy.redelivery();
        self.state.mark_exhausted();
        exchange.mark_redelivery_exhausted();

        if policy.use_original_message() {
            exchange.restore_original_message();
        } else if policy.use_original_body() {
            exchange.restore_original_body();
        }

        if redelivery.log_exhausted {
            let cause = redelivery.log_stack_trace.then(|| failure.chain());
            log_at!(
                redelivery.retries_exhausted_log_level,
                exchange = %exchange.id(),
                policy = policy.id(),
                attempts = self.state.attempt_count,
                has_outputs = policy.has_outputs(),
                fallback = self.shared.fallback.as_ref().map(|f| f.destination()),
                failure = %failure,
                cause = cause.as_deref(),
                "redelivery exhausted"
            );
        }

        let processor = policy.failure_processor();
        let fallback = self.shared.fallback.as_ref();
        if processor.is_none() && fallback.is_none() {
            return Step::Done(Err(self.propagate(failure)));
        }

        exchange.clear_redelivery_headers();
        if let Some(hook) = &self.shared.on_prepare_failure {
            run_guarded(hook.as_ref(), HookPoint::PrepareFailure, exchange, &failure);
        }
        exchange.suppress_failure(failure.clone(), scope);
        let delivered = match (processor, fallback) {
            (Some(stage), _) => run_failure_processor(stage, policy, exchange).await,
            (None, Some(fallback)) => fallback.deliver(exchange).await,
            (None, None) => true,
        };
        if !delivered {
            self.shared.stats.fallback_failure();
            metrics::inc_fallback_failures();
        }

        // Only a dead letter channel suppresses the failure for good.
        if fallback.is_none() {
            exchange.set_failure(failure.clone());
            return Step::Done(Err(self.propagate(failure)));
        }
        exchange.set_route_stop(true);
        self.last_failure = None;
        self.finish(EpisodeState::DeadLettered);
        Step::Done(Ok(Disposition::DeadLettered))
    }

    fn propagate(&mut self, failure: Failure) -> Failure {
        self.finish(EpisodeState::Propagated);
        failure
    }

    fn finish(&mut self, state: EpisodeState) {
        self.state.finish(state);
        self.shared.stats.finished(state);
        if let Some(outcome) = state.outcome() {
            metrics::inc_episodes(outcome);
        }
    }
}

/// Run a policy's failure processor. Returns `false` if it failed or
/// panicked; neither reaches the episode.
async fn run_failure_processor(
    stage: &SharedStage,
    policy: &ExceptionPolicy,
    exchange: &mut Exchange,
) -> bool {
    let id = exchange.id();
    let reason = match panic::catch_async(stage.process(exchange)).await {
        Ok(Ok(())) => {
            debug!(exchange = %id, policy = policy.id(), "failure processor completed");
            return true;
        }
        Ok(Err(failure)) => failure.chain(),
        Err(panic) => format!("failure processor panicked: {panic}"),
    };
    warn!(
        exchange = %id,
        policy = policy.id(),
        reason = %reason,
        "failure processor failed"
    );
    false
}

/// Delay requested through the `RedeliveryDelay` header.
fn header_delay(exchange: &Exchange) -> Option<Duration> {
    let raw = exchange.header(headers::REDELIVERY_DELAY)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!(
                exchange = %exchange.id(),
                value = raw,
                error = %e,
                "ignoring malformed redelivery delay header"
            );
            None
        }
    }
}
