//! Counters kept per error handler.

use std::sync::atomic::{AtomicU64, Ordering};

use super::EpisodeState;

/// Lock-free counters updated as episodes progress.
#[derive(Debug, Default)]
pub struct HandlerStats {
    failures: AtomicU64,
    redeliveries: AtomicU64,
    recovered: AtomicU64,
    continued: AtomicU64,
    handled: AtomicU64,
    dead_lettered: AtomicU64,
    propagated: AtomicU64,
    fallback_failures: AtomicU64,
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Primary failures observed, including those of redeliveries.
    pub failures: u64,
    /// Redeliveries started.
    pub redeliveries: u64,
    /// Episodes that ended in a successful redelivery.
    pub recovered: u64,
    /// Episodes that ended continued.
    pub continued: u64,
    /// Episodes that ended handled.
    pub handled: u64,
    /// Episodes that ended at the fallback destination.
    pub dead_lettered: u64,
    /// Episodes whose failure surfaced to the caller.
    pub propagated: u64,
    /// Fallback deliveries that failed.
    pub fallback_failures: u64,
}

impl HandlerStats {
    pub(crate) fn failure(&self) { self.failures.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn redelivery(&self) { self.redeliveries.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn fallback_failure(&self) { self.fallback_failures.fetch_add(1, Ordering::Relaxed); }

    pub(crate) fn finished(&self, state: EpisodeState) {
        let counter = match state {
            EpisodeState::Active => return,
            EpisodeState::Recovered => &self.recovered,
            EpisodeState::Continued => &self.continued,
            EpisodeState::Handled => &self.handled,
            EpisodeState::DeadLettered => &self.dead_lettered,
            EpisodeState::Propagated => &self.propagated,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            failures: self.failures.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            continued: self.continued.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            propagated: self.propagated.load(Ordering::Relaxed),
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
        }
    }
}
