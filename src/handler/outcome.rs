//! Results reported by the error handler.

use crate::{exchange::Exchange, failure::Failure, metrics::Outcome};

/// How an exchange left the error handler without surfacing a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The stage succeeded on the first attempt.
    Completed,
    /// The stage succeeded after the given number of redeliveries.
    Recovered {
        /// Redeliveries performed before the success.
        redeliveries: u32,
    },
    /// The failure was suppressed and routing continues.
    Continued,
    /// The failure was suppressed and routing stops.
    Handled,
    /// Redeliveries were exhausted and the exchange went to the fallback
    /// destination.
    DeadLettered,
}

impl Disposition {
    /// Returns `true` if later stages must not run.
    #[must_use]
    pub const fn stops_routing(self) -> bool { matches!(self, Self::Handled | Self::DeadLettered) }

    /// Returns `true` if a failure was caught on the way.
    #[must_use]
    pub const fn caught_failure(self) -> bool {
        matches!(self, Self::Continued | Self::Handled | Self::DeadLettered)
    }
}

/// Lifecycle of one failure-handling episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EpisodeState {
    /// Processing or waiting to redeliver.
    #[default]
    Active,
    /// A redelivery succeeded.
    Recovered,
    /// Suppressed, routing continues.
    Continued,
    /// Suppressed, routing stops.
    Handled,
    /// Sent to the fallback destination.
    DeadLettered,
    /// The primary failure surfaced to the caller.
    Propagated,
}

impl EpisodeState {
    /// Returns `true` for every state but [`EpisodeState::Active`].
    #[must_use]
    pub const fn is_terminal(self) -> bool { !matches!(self, Self::Active) }

    pub(crate) const fn outcome(self) -> Option<Outcome> {
        match self {
            Self::Active => None,
            Self::Recovered => Some(Outcome::Recovered),
            Self::Continued => Some(Outcome::Continued),
            Self::Handled => Some(Outcome::Handled),
            Self::DeadLettered => Some(Outcome::DeadLettered),
            Self::Propagated => Some(Outcome::Propagated),
        }
    }
}

/// Final report for an exchange passed to
/// [`ErrorHandler::submit`](super::ErrorHandler::submit).
#[derive(Debug)]
pub struct Completion {
    /// The exchange, in its final state.
    pub exchange: Exchange,
    /// Disposition, or the primary failure if it propagated.
    pub outcome: Result<Disposition, Failure>,
}

/// Whether [`ErrorHandler::submit`](super::ErrorHandler::submit) finished
/// before returning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// The completion callback already ran.
    Completed,
    /// A redelivery is parked on the scheduler; the callback runs later.
    Pending,
}
