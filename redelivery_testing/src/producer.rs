//! A [`Producer`] double that records what it was sent.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use redelivery::{Exchange, Failure, FailureType, Producer};

/// How a [`RecordingProducer`] responds to a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerMode {
    /// Record and succeed.
    Accept,
    /// Record and return a failure.
    Refuse,
    /// Record and panic.
    Panic,
}

/// Records every exchange sent to it.
#[derive(Debug)]
pub struct RecordingProducer {
    mode: ProducerMode,
    received: Mutex<Vec<(String, Exchange)>>,
}

impl RecordingProducer {
    /// Create a producer with the given behaviour.
    #[must_use]
    pub fn new(mode: ProducerMode) -> Self {
        Self {
            mode,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Producer that accepts everything.
    #[must_use]
    pub fn accepting() -> Self { Self::new(ProducerMode::Accept) }

    /// Producer that fails every send.
    #[must_use]
    pub fn refusing() -> Self { Self::new(ProducerMode::Refuse) }

    /// Producer that panics on every send.
    #[must_use]
    pub fn panicking() -> Self { Self::new(ProducerMode::Panic) }

    /// Destinations and exchanges received so far.
    #[must_use]
    pub fn received(&self) -> Vec<(String, Exchange)> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sends attempted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing was sent.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn send(&self, destination: &str, exchange: Exchange) -> Result<(), Failure> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_owned(), exchange));
        match self.mode {
            ProducerMode::Accept => Ok(()),
            ProducerMode::Refuse => Err(Failure::new(
                FailureType::root("ProducerError"),
                format!("{destination} refused the exchange"),
            )),
            ProducerMode::Panic => panic!("producer for {destination} exploded"),
        }
    }
}
