//! Delivery of exhausted exchanges to a fallback (dead-letter) destination.
//!
//! [`FallbackDispatcher::deliver`] is the only way the error handler talks to
//! the fallback destination and it never fails: errors and panics raised by
//! the [`Producer`] are logged (throttled) and counted, never re-raised.

mod dispatcher;
mod producer;

pub use dispatcher::{FallbackConfig, FallbackDispatcher};
pub use producer::{ChannelProducer, DeadLetter, Producer};
