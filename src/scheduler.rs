//! Timers used for asynchronous redelivery.
//!
//! When a policy sets `async_delayed_redelivery`, the error handler does not
//! hold the caller's task for the delay. It hands a [`ScheduledTask`] to a
//! [`Scheduler`] and the task resumes the episode when the timer fires.
//!
//! [`TokioScheduler`] is the default implementation. Its tasks are tracked so
//! [`TokioScheduler::shutdown`] can wait for them, and stopping wakes every
//! pending task early with [`Wakeup::Stopping`].

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{runtime::Handle, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::error;

/// Why a scheduled task is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// The requested delay elapsed.
    Elapsed,
    /// The scheduler is stopping; the delay may not have elapsed.
    Stopping,
}

/// Continuation executed by a [`Scheduler`].
pub type ScheduledTask = Box<dyn FnOnce(Wakeup) -> BoxFuture<'static, ()> + Send>;

/// Errors returned when a task cannot be scheduled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The scheduler no longer accepts tasks.
    #[error("scheduler is shut down")]
    ShutDown,
    /// No Tokio runtime is available to drive the timer.
    #[error("no tokio runtime available")]
    NoRuntime,
}

/// A task the scheduler refused, handed back to the caller.
pub struct Rejected {
    /// Why the task was refused.
    pub error: ScheduleError,
    /// The task, not yet run.
    pub task: ScheduledTask,
}

impl std::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Capability to run a task after a delay.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns the task inside [`Rejected`] if it cannot be accepted, so the
    /// caller can run it some other way.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), Rejected>;
}

/// [`Scheduler`] backed by Tokio timers.
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler {
    tracker: TaskTracker,
    stopping: CancellationToken,
}

impl TokioScheduler {
    /// Create a scheduler with its own stop signal.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create a scheduler that stops when `token` is cancelled.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            stopping: token,
        }
    }

    /// Wake all pending tasks with [`Wakeup::Stopping`].
    pub fn stop(&self) { self.stopping.cancel(); }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopping(&self) -> bool { self.stopping.is_cancelled() }

    /// Number of tasks waiting or running.
    #[must_use]
    pub fn pending(&self) -> usize { self.tracker.len() }

    /// Stop, refuse new tasks and wait for pending ones to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<(), Rejected> {
        if self.tracker.is_closed() {
            return Err(Rejected {
                error: ScheduleError::ShutDown,
                task,
            });
        }
        let Ok(handle) = Handle::try_current() else {
            return Err(Rejected {
                error: ScheduleError::NoRuntime,
                task,
            });
        };
        let stopping = self.stopping.clone();
        self.tracker.spawn_on(
            async move {
                let wakeup = tokio::select! {
                    biased;
                    () = stopping.cancelled() => Wakeup::Stopping,
                    () = sleep(delay) => Wakeup::Elapsed,
                };
                if let Err(panic) = crate::panic::catch_async(task(wakeup)).await {
                    error!(panic = %panic, ?wakeup, "scheduled task panicked");
                }
            },
            &handle,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::FutureExt;
    use tokio::{sync::oneshot, time::Instant};

    use super::*;

    fn task(f: impl FnOnce(Wakeup) -> BoxFuture<'static, ()> + Send + 'static) -> ScheduledTask {
        Box::new(f)
    }

    fn reporting(tx: oneshot::Sender<(Wakeup, Instant)>) -> ScheduledTask {
        task(move |wakeup| {
            async move {
                let _ = tx.send((wakeup, Instant::now()));
            }
            .boxed()
        })
    }

    fn noop() -> ScheduledTask { task(|_| async {}.boxed()) }

    async fn explode() { panic!("task exploded") }

    #[tokio::test(start_paused = true)]
    async fn runs_after_delay() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel();
        let start = Instant::now();
        scheduler
            .schedule(Duration::from_millis(250), reporting(tx))
            .expect("schedule");
        let (wakeup, at) = rx.await.expect("task ran");
        assert_eq!(wakeup, Wakeup::Elapsed);
        assert_eq!(at - start, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_wakes_pending_tasks_early() {
        let scheduler = TokioScheduler::new();
        let (tx, rx) = oneshot::channel();
        let start = Instant::now();
        scheduler
            .schedule(Duration::from_secs(60), reporting(tx))
            .expect("schedule");
        tokio::time::advance(Duration::from_secs(1)).await;
        scheduler.stop();
        let (wakeup, at) = rx.await.expect("task ran");
        assert_eq!(wakeup, Wakeup::Stopping);
        assert!(at - start < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_and_then_refuses() {
        let scheduler = TokioScheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            let counting = task(move |_| {
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            });
            scheduler
                .schedule(Duration::from_millis(10), counting)
                .expect("schedule");
        }
        assert_eq!(scheduler.pending(), 3);
        scheduler.shutdown().await;
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        let refused = scheduler.schedule(Duration::ZERO, noop()).map_err(|r| r.error);
        assert_eq!(refused, Err(ScheduleError::ShutDown));
    }

    #[test]
    fn requires_a_runtime() {
        let scheduler = TokioScheduler::new();
        let refused = scheduler.schedule(Duration::ZERO, noop()).map_err(|r| r.error);
        assert_eq!(refused, Err(ScheduleError::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_contained() {
        let scheduler = TokioScheduler::new();
        scheduler
            .schedule(Duration::ZERO, task(|_| explode().boxed()))
            .expect("schedule");
        scheduler.shutdown().await;
        assert_eq!(scheduler.pending(), 0);
    }
}
