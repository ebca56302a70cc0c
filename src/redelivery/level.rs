//! Log levels selectable per redelivery event.

use serde::{Deserialize, Serialize};
use tracing::Level;

/// Level at which a redelivery event is logged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// `TRACE`.
    Trace,
    /// `DEBUG`.
    #[default]
    Debug,
    /// `INFO`.
    Info,
    /// `WARN`.
    Warn,
    /// `ERROR`.
    Error,
    /// Do not log.
    Off,
}

impl LoggingLevel {
    /// Matching `tracing` level, or `None` for [`LoggingLevel::Off`].
    ///
    /// ```
    /// use redelivery::redelivery::LoggingLevel;
    /// use tracing::Level;
    ///
    /// assert_eq!(LoggingLevel::Warn.as_tracing(), Some(Level::WARN));
    /// assert_eq!(LoggingLevel::Off.as_tracing(), None);
    /// ```
    #[must_use]
    pub const fn as_tracing(self) -> Option<Level> {
        match self {
            Self::Trace => Some(Level::TRACE),
            Self::Debug => Some(Level::DEBUG),
            Self::Info => Some(Level::INFO),
            Self::Warn => Some(Level::WARN),
            Self::Error => Some(Level::ERROR),
            Self::Off => None,
        }
    }

    /// Returns `true` unless the level is [`LoggingLevel::Off`].
    #[must_use]
    pub const fn is_enabled(self) -> bool { !matches!(self, Self::Off) }
}
