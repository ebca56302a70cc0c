//! One-way senders used by the fallback dispatcher.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    exchange::Exchange,
    failure::{Failure, FailureType},
};

/// Delivers an exchange one-way to a named destination.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    /// Send `exchange` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns a [`Failure`] if the destination refuses the exchange.
    async fn send(&self, destination: &str, exchange: Exchange) -> Result<(), Failure>;
}

/// An exchange handed to a [`ChannelProducer`].
#[derive(Debug)]
pub struct DeadLetter {
    /// Destination the exchange was addressed to.
    pub destination: String,
    /// The exhausted exchange.
    pub exchange: Exchange,
}

/// [`Producer`] that pushes exchanges into a bounded Tokio channel.
///
/// The send never waits: a full or closed channel is reported as a failure.
///
/// ```
/// use redelivery::fallback::ChannelProducer;
///
/// let (producer, mut rx) = ChannelProducer::channel(8);
/// # drop((producer, rx.try_recv()));
/// ```
#[derive(Clone, Debug)]
pub struct ChannelProducer {
    tx: mpsc::Sender<DeadLetter>,
}

impl ChannelProducer {
    /// Wrap an existing sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<DeadLetter>) -> Self { Self { tx } }

    /// Create a producer and the receiving end of its channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DeadLetter>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Producer for ChannelProducer {
    async fn send(&self, destination: &str, exchange: Exchange) -> Result<(), Failure> {
        let letter = DeadLetter {
            destination: destination.to_owned(),
            exchange,
        };
        self.tx.try_send(letter).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            Failure::new(
                FailureType::root("FallbackChannelError"),
                format!("fallback channel for {destination} is {reason}"),
            )
        })
    }
}
