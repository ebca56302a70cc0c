//! Logging at a level chosen at runtime.

/// Emit a `tracing` event at a [`LoggingLevel`](crate::redelivery::LoggingLevel)
/// picked by configuration. `Off` emits nothing.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::redelivery::LoggingLevel::Error => tracing::error!($($arg)+),
            $crate::redelivery::LoggingLevel::Warn => tracing::warn!($($arg)+),
            $crate::redelivery::LoggingLevel::Info => tracing::info!($($arg)+),
            $crate::redelivery::LoggingLevel::Debug => tracing::debug!($($arg)+),
            $crate::redelivery::LoggingLevel::Trace => tracing::trace!($($arg)+),
            $crate::redelivery::LoggingLevel::Off => {}
        }
    };
}

pub(crate) use log_at;
