//! A [`Stage`] double that fails a fixed number of times.

use std::{
    sync::{
        Mutex,
        PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use redelivery::{Exchange, Failure, FailureType, Message, Stage};
use tokio::time::Instant;

/// Fails its first `failures` invocations with `kind`, then succeeds.
///
/// Every invocation records the message it saw and the Tokio instant it ran
/// at, which makes back-off schedules observable under paused time.
#[derive(Debug)]
pub struct FlakyStage {
    kind: FailureType,
    failures: usize,
    mutate: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<(Instant, Message)>>,
}

impl FlakyStage {
    /// Fail `failures` times, then succeed.
    #[must_use]
    pub fn new(kind: FailureType, failures: usize) -> Self {
        Self {
            kind,
            failures,
            mutate: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Never succeed.
    #[must_use]
    pub fn always(kind: FailureType) -> Self { Self::new(kind, usize::MAX) }

    /// Append the call number to the body and set a `Touched` header before
    /// failing, so tests can observe whether mutations survive.
    #[must_use]
    pub fn mutating(mut self) -> Self {
        self.mutate = true;
        self
    }

    /// Invocations so far.
    #[must_use]
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    /// Instants at which the stage ran.
    #[must_use]
    pub fn instants(&self) -> Vec<Instant> { self.seen().iter().map(|(at, _)| *at).collect() }

    /// Time between consecutive invocations.
    #[must_use]
    pub fn gaps(&self) -> Vec<Duration> {
        self.instants()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    /// Bodies the stage received, in order.
    #[must_use]
    pub fn bodies(&self) -> Vec<Bytes> {
        self.seen()
            .iter()
            .map(|(_, message)| message.body().clone())
            .collect()
    }

    /// Values of header `name` the stage received, in order.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<Option<String>> {
        self.seen()
            .iter()
            .map(|(_, message)| message.header(name).map(str::to_owned))
            .collect()
    }

    fn seen(&self) -> Vec<(Instant, Message)> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Stage for FlakyStage {
    async fn process(&self, exchange: &mut Exchange) -> Result<(), Failure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), exchange.message().clone()));
        if call >= self.failures {
            return Ok(());
        }
        if self.mutate {
            let mut body = exchange.body().to_vec();
            body.extend_from_slice(format!("+{call}").as_bytes());
            exchange.set_body(body);
            exchange.set_header("Touched", call);
        }
        Err(Failure::new(self.kind.clone(), format!("attempt {call} failed")))
    }
}
