//! The error handler: runs a stage under failure protection.
//!
//! [`ErrorHandler`] wraps one [`Stage`]. A successful invocation passes
//! through untouched. A failure starts an episode that resolves an
//! [`ExceptionPolicy`](crate::exception::ExceptionPolicy), then redelivers,
//! suppresses, or diverts the exchange to the fallback destination until a
//! terminal state is reached.
//!
//! Two entry points drive the same state machine:
//!
//! - [`ErrorHandler::process`] borrows the exchange and returns once the
//!   episode is over. Asynchronous redelivery waits on the scheduler without
//!   holding a timer of its own.
//! - [`ErrorHandler::submit`] takes ownership of the exchange and reports
//!   through a callback. When a policy asks for asynchronous redelivery the
//!   episode is parked on the scheduler and `submit` returns immediately.

mod builder;
mod episode;
mod log;
mod outcome;
mod stats;

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use tokio::{
    sync::oneshot,
    time::{Instant, sleep, sleep_until},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, warn};

pub use builder::ErrorHandlerBuilder;
use episode::{Episode, Step};
pub use episode::RedeliveryState;
pub use outcome::{Completion, Disposition, EpisodeState, Submitted};
pub use stats::{HandlerStats, StatsSnapshot};

use crate::{
    exception::ExceptionPolicyRegistry,
    exchange::Exchange,
    failure::Failure,
    fallback::FallbackDispatcher,
    hooks::SharedHook,
    metrics,
    panic,
    redelivery::RedeliveryPolicy,
    scheduler::{ScheduledTask, Scheduler, Wakeup},
    stage::{SharedStage, Stage},
};

type CompletionCallback = Box<dyn FnOnce(Completion) + Send>;

pub(crate) struct HandlerShared {
    stage: SharedStage,
    route_id: Option<Arc<str>>,
    registry: ExceptionPolicyRegistry,
    default_policy: RedeliveryPolicy,
    fallback: Option<FallbackDispatcher>,
    on_prepare_failure: Option<SharedHook>,
    scheduler: Arc<dyn Scheduler>,
    stopping: CancellationToken,
    tracker: TaskTracker,
    stats: HandlerStats,
    pending: AtomicUsize,
    capture_original: bool,
}

impl HandlerShared {
    fn is_stopping(&self) -> bool { self.stopping.is_cancelled() }

    fn route_scope(&self, exchange: &Exchange) -> Option<Arc<str>> {
        self.route_id
            .clone()
            .or_else(|| exchange.route_id().map(Arc::from))
    }

    fn route_label<'a>(&'a self, exchange: &'a Exchange) -> &'a str {
        self.route_id
            .as_deref()
            .or(exchange.route_id())
            .unwrap_or("unrouted")
    }

    /// Sleep on the caller's task, waking early if the handler stops.
    async fn wait_inline(&self, delay: Duration) -> Wakeup {
        tokio::select! {
            biased;
            () = self.stopping.cancelled() => Wakeup::Stopping,
            () = sleep(delay) => Wakeup::Elapsed,
        }
    }

    /// Park on the scheduler until the delay elapses.
    async fn wait_scheduled(&self, delay: Duration) -> Wakeup {
        let (tx, rx) = oneshot::channel();
        let task: ScheduledTask = Box::new(move |wakeup: Wakeup| {
            let _ = tx.send(wakeup);
            futures::future::ready(()).boxed()
        });
        match self.scheduler.schedule(delay, task) {
            Ok(()) => rx.await.unwrap_or(Wakeup::Stopping),
            Err(rejected) => {
                warn!(error = %rejected.error, "scheduler refused redelivery; waiting inline");
                self.wait_inline(delay).await
            }
        }
    }

    /// Decide whether a woken episode may redeliver. Sleeps out the rest of
    /// the delay when a stop woke it early but redelivery stays allowed.
    async fn settle(&self, episode: &Episode, wakeup: Wakeup, deadline: Instant) -> bool {
        if wakeup == Wakeup::Stopping || self.is_stopping() {
            if !episode.allows_redelivery_while_stopping() {
                return false;
            }
            sleep_until(deadline).await;
        }
        true
    }

    /// Wait out `delay`, then settle. The episode counts as pending until it
    /// is cleared to redeliver or abandoned.
    async fn pause(self: &Arc<Self>, episode: &Episode, delay: Duration, scheduled: bool) -> bool {
        let deadline = Instant::now() + delay;
        let _pending = PendingGuard::new(self);
        let wakeup = if scheduled {
            self.wait_scheduled(delay).await
        } else {
            self.wait_inline(delay).await
        };
        self.settle(episode, wakeup, deadline).await
    }
}

/// Counts an episode as waiting for the lifetime of the guard.
struct PendingGuard(Arc<HandlerShared>);

impl PendingGuard {
    fn new(shared: &Arc<HandlerShared>) -> Self {
        shared.pending.fetch_add(1, Ordering::SeqCst);
        metrics::inc_pending();
        Self(Arc::clone(shared))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
        metrics::dec_pending();
    }
}

fn complete(on_complete: CompletionCallback, exchange: Exchange, outcome: Result<Disposition, Failure>) {
    let id = exchange.id();
    let completion = Completion { exchange, outcome };
    if let Err(panic) = panic::catch(move || on_complete(completion)) {
        error!(exchange = %id, panic = %panic, "completion callback panicked");
    }
}

/// An episode parked on the scheduler, waiting for its redelivery.
struct Parked {
    episode: Episode,
    exchange: Exchange,
    on_complete: CompletionCallback,
    _pending: PendingGuard,
}

/// Hand-off between the driver and the scheduled task. Whoever takes the
/// episode first owns it: the task when it fires, the driver when the
/// scheduler refuses the task.
type ParkingSlot = Arc<Mutex<Option<Parked>>>;

fn unpark(slot: &ParkingSlot) -> Option<Parked> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Continuation resuming a parked episode once its delay elapses.
fn resume(shared: Arc<HandlerShared>, slot: ParkingSlot, deadline: Instant) -> ScheduledTask {
    Box::new(move |wakeup: Wakeup| {
        async move {
            let Some(parked) = unpark(&slot) else {
                return;
            };
            let Parked {
                mut episode,
                mut exchange,
                on_complete,
                _pending: pending,
            } = parked;
            let proceed = shared.settle(&episode, wakeup, deadline).await;
            drop(pending);
            if proceed {
                drive_detached(shared, episode, exchange, on_complete).await;
            } else {
                let outcome = episode.abandon(&mut exchange);
                complete(on_complete, exchange, outcome);
            }
        }
        .boxed()
    })
}

/// Run `episode` until it finishes or parks on the scheduler.
///
/// A refused schedule takes the episode back and waits inline within this
/// same future, so refusals never nest.
fn drive_detached(
    shared: Arc<HandlerShared>,
    mut episode: Episode,
    mut exchange: Exchange,
    mut on_complete: CompletionCallback,
) -> BoxFuture<'static, Submitted> {
    async move {
        let outcome = loop {
            let delay = match episode.step(&mut exchange).await {
                Step::Done(outcome) => break outcome,
                Step::Wait(delay) => delay,
            };

            if !episode.wants_async_wait() {
                if !shared.pause(&episode, delay, false).await {
                    break episode.abandon(&mut exchange);
                }
                continue;
            }

            let deadline = Instant::now() + delay;
            let slot: ParkingSlot = Arc::new(Mutex::new(Some(Parked {
                _pending: PendingGuard::new(&shared),
                episode,
                exchange,
                on_complete,
            })));
            let task = resume(Arc::clone(&shared), Arc::clone(&slot), deadline);
            let rejected = match shared.scheduler.schedule(delay, task) {
                Ok(()) => return Submitted::Pending,
                Err(rejected) => rejected,
            };
            drop(rejected.task);
            warn!(error = %rejected.error, "scheduler refused redelivery; waiting inline");
            let Some(Parked {
                episode: held,
                exchange: message,
                on_complete: callback,
                ..
            }) = unpark(&slot)
            else {
                return Submitted::Pending;
            };
            (episode, exchange, on_complete) = (held, message, callback);
            if !shared.pause(&episode, delay, false).await {
                break episode.abandon(&mut exchange);
            }
        };
        complete(on_complete, exchange, outcome);
        Submitted::Completed
    }
    .boxed()
}

/// Runs a [`Stage`] under failure protection.
///
/// Cloning is cheap; clones share configuration, statistics and lifecycle.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicUsize, Ordering},
/// };
///
/// use redelivery::{
///     exception::ExceptionPolicy,
///     exchange::Exchange,
///     failure::{Failure, FailureType},
///     handler::{Disposition, ErrorHandler},
///     redelivery::RedeliveryOverrides,
///     stage::stage_fn,
/// };
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let io = FailureType::root("IoError");
/// let calls = Arc::new(AtomicUsize::new(0));
/// let seen = Arc::clone(&calls);
/// let kind = io.clone();
/// let stage = stage_fn(move |_: &mut Exchange| -> Result<(), Failure> {
///     if seen.fetch_add(1, Ordering::SeqCst) == 0 {
///         return Err(Failure::new(kind.clone(), "connection reset"));
///     }
///     Ok(())
/// });
///
/// let handler = ErrorHandler::builder(stage)
///     .exception_policy(
///         ExceptionPolicy::builder("io")
///             .exception(io)
///             .redelivery(
///                 RedeliveryOverrides::default()
///                     .maximum_redeliveries(3)
///                     .redelivery_delay(Duration::ZERO),
///             ),
///     )
///     .build()
///     .expect("valid configuration");
///
/// let mut exchange = Exchange::new("payload");
/// let outcome = handler.process(&mut exchange).await;
/// assert_eq!(outcome.ok(), Some(Disposition::Recovered { redeliveries: 1 }));
/// assert_eq!(exchange.header("RedeliveryCounter"), Some("1"));
/// # }
/// ```
#[derive(Clone)]
pub struct ErrorHandler {
    shared: Arc<HandlerShared>,
}

impl ErrorHandler {
    /// Start configuring a handler around `stage`.
    pub fn builder(stage: impl Stage) -> ErrorHandlerBuilder { ErrorHandlerBuilder::new(Arc::new(stage)) }

    /// Process `exchange`, handling failures until a terminal state.
    ///
    /// # Errors
    ///
    /// Returns the primary failure when no policy matches, when redeliveries
    /// are exhausted without a fallback destination, or when a pending
    /// redelivery is abandoned because the handler is stopping. The failure
    /// also stays attached to the exchange.
    pub async fn process(&self, exchange: &mut Exchange) -> Result<Disposition, Failure> {
        self.process_with_state(exchange).await.0
    }

    /// [`process`](Self::process), also returning the final redelivery state.
    pub async fn process_with_state(
        &self,
        exchange: &mut Exchange,
    ) -> (Result<Disposition, Failure>, RedeliveryState) {
        let shared = &self.shared;
        let mut episode = Episode::begin(Arc::clone(shared), exchange);
        let outcome = loop {
            let delay = match episode.step(exchange).await {
                Step::Done(outcome) => break outcome,
                Step::Wait(delay) => delay,
            };
            if !shared.pause(&episode, delay, episode.wants_async_wait()).await {
                break episode.abandon(exchange);
            }
        };
        (outcome, episode.state().clone())
    }

    /// Process an owned exchange and report through `on_complete`.
    ///
    /// Returns [`Submitted::Completed`] if the callback already ran, or
    /// [`Submitted::Pending`] if the episode is parked on the scheduler.
    pub async fn submit<F>(&self, mut exchange: Exchange, on_complete: F) -> Submitted
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let episode = Episode::begin(Arc::clone(&self.shared), &mut exchange);
        drive_detached(Arc::clone(&self.shared), episode, exchange, Box::new(on_complete)).await
    }

    /// Signal that the handler is stopping.
    ///
    /// Waiting redeliveries wake up. Those whose policy forbids redelivery
    /// while stopping are abandoned and their failure propagates; the rest
    /// finish their delay and carry on.
    pub fn stop(&self) { self.shared.stopping.cancel(); }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopping(&self) -> bool { self.shared.is_stopping() }

    /// Stop and wait for every in-flight episode to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }

    /// Episodes currently waiting for a redelivery.
    #[must_use]
    pub fn pending_redeliveries(&self) -> usize { self.shared.pending.load(Ordering::SeqCst) }

    /// Episodes currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize { self.shared.tracker.len() }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot { self.shared.stats.snapshot() }

    /// Route this handler belongs to.
    #[must_use]
    pub fn route_id(&self) -> Option<&str> { self.shared.route_id.as_deref() }

    /// Resolved exception policies.
    #[must_use]
    pub fn registry(&self) -> &ExceptionPolicyRegistry { &self.shared.registry }

    /// Policy inline overrides are applied to.
    #[must_use]
    pub fn default_policy(&self) -> &RedeliveryPolicy { &self.shared.default_policy }

    /// Fallback destination, if one is configured.
    #[must_use]
    pub fn fallback_destination(&self) -> Option<&str> {
        self.shared.fallback.as_ref().map(FallbackDispatcher::destination)
    }
}

#[async_trait]
impl Stage for ErrorHandler {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        ErrorHandler::process(self, exchange).await.map(|_| ())
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("route_id", &self.shared.route_id)
            .field("registry", &self.shared.registry)
            .field("fallback", &self.shared.fallback)
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
