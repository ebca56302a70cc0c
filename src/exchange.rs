//! The unit of work travelling through a pipeline.
//!
//! An [`Exchange`] carries a mutable [`Message`] (body and headers), an
//! optional snapshot of the message as first observed by the pipeline, and the
//! failure bookkeeping the error handler maintains while an episode runs.

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;

use crate::failure::Failure;

/// Header names written by the error handler.
pub mod headers {
    /// Set to `"true"` once an exchange has been redelivered.
    pub const REDELIVERED: &str = "Redelivered";
    /// Number of redeliveries performed in the current episode.
    pub const REDELIVERY_COUNTER: &str = "RedeliveryCounter";
    /// Maximum redeliveries permitted by the active policy.
    pub const REDELIVERY_MAX_COUNTER: &str = "RedeliveryMaxCounter";
    /// Overrides the computed redelivery delay, in milliseconds.
    pub const REDELIVERY_DELAY: &str = "RedeliveryDelay";

    pub(crate) const BOOKKEEPING: [&str; 3] =
        [REDELIVERED, REDELIVERY_COUNTER, REDELIVERY_MAX_COUNTER];
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    fn next() -> Self { Self(NEXT_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ex-{}", self.0)
    }
}

/// Body and headers of an exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
    headers: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with the given body and no headers.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Message payload.
    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    /// Replace the payload.
    pub fn set_body(&mut self, body: impl Into<Bytes>) { self.body = body.into(); }

    /// All headers, ordered by name.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> { &self.headers }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { self.headers.get(name).map(String::as_str) }

    /// Set a header, returning the previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl ToString) -> Option<String> {
        self.headers.insert(name.into(), value.to_string())
    }

    /// Remove a header, returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> { self.headers.remove(name) }
}

/// A single in-flight unit of work.
///
/// ```
/// use redelivery::exchange::Exchange;
///
/// let mut exchange = Exchange::new("order-17");
/// exchange.capture_original();
/// exchange.set_body("order-17 (enriched)");
/// exchange.restore_original_message();
/// assert_eq!(exchange.body().as_ref(), b"order-17");
/// ```
#[derive(Clone, Debug, Default)]
pub struct Exchange {
    id: ExchangeId,
    route_id: Option<Arc<str>>,
    message: Message,
    original: Option<Arc<Message>>,
    failure: Option<Failure>,
    caught_failure: Option<Failure>,
    failure_route_id: Option<Arc<str>>,
    continued: bool,
    route_stop: bool,
    redelivery_exhausted: bool,
}

impl Exchange {
    /// Create an exchange with a fresh identifier.
    pub fn new(body: impl Into<Bytes>) -> Self { Self::from_message(Message::new(body)) }

    /// Create an exchange around an existing message.
    #[must_use]
    pub fn from_message(message: Message) -> Self {
        Self {
            id: ExchangeId::next(),
            message,
            ..Self::default()
        }
    }

    /// Set a header while building an exchange.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.message.set_header(name, value);
        self
    }

    /// Set the route the exchange is travelling while building it.
    #[must_use]
    pub fn with_route_id(mut self, route_id: impl Into<Arc<str>>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    /// Identifier of this exchange.
    #[must_use]
    pub fn id(&self) -> ExchangeId { self.id }

    /// Route currently processing the exchange.
    #[must_use]
    pub fn route_id(&self) -> Option<&str> { self.route_id.as_deref() }

    /// Record the route currently processing the exchange.
    pub fn set_route_id(&mut self, route_id: Option<Arc<str>>) { self.route_id = route_id; }

    /// Current message.
    #[must_use]
    pub fn message(&self) -> &Message { &self.message }

    /// Mutable access to the current message.
    pub fn message_mut(&mut self) -> &mut Message { &mut self.message }

    /// Replace the current message wholesale.
    pub fn set_message(&mut self, message: Message) { self.message = message; }

    /// Shorthand for `message().body()`.
    #[must_use]
    pub fn body(&self) -> &Bytes { self.message.body() }

    /// Shorthand for `message_mut().set_body()`.
    pub fn set_body(&mut self, body: impl Into<Bytes>) { self.message.set_body(body); }

    /// Shorthand for `message().header()`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { self.message.header(name) }

    /// Shorthand for `message_mut().set_header()`.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl ToString) -> Option<String> {
        self.message.set_header(name, value)
    }

    /// Shorthand for `message_mut().remove_header()`.
    pub fn remove_header(&mut self, name: &str) -> Option<String> { self.message.remove_header(name) }

    /// Snapshot the current message as the original, unless one was already
    /// taken. Returns `true` if a snapshot was taken by this call.
    pub fn capture_original(&mut self) -> bool {
        if self.original.is_some() {
            return false;
        }
        self.original = Some(Arc::new(self.message.clone()));
        true
    }

    /// Message as first observed by the pipeline, if captured.
    #[must_use]
    pub fn original(&self) -> Option<&Message> { self.original.as_deref() }

    /// Restore body and headers from the original snapshot.
    ///
    /// Returns `false` when no snapshot exists.
    pub fn restore_original_message(&mut self) -> bool {
        match &self.original {
            Some(original) => {
                self.message = Message::clone(original);
                true
            }
            None => false,
        }
    }

    /// Restore only the body from the original snapshot, keeping headers.
    ///
    /// Returns `false` when no snapshot exists.
    pub fn restore_original_body(&mut self) -> bool {
        match &self.original {
            Some(original) => {
                self.message.body = original.body.clone();
                true
            }
            None => false,
        }
    }

    /// Failure currently attached to the exchange.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> { self.failure.as_ref() }

    /// Returns `true` while a failure is attached.
    #[must_use]
    pub fn is_failed(&self) -> bool { self.failure.is_some() }

    /// Attach a failure.
    pub fn set_failure(&mut self, failure: Failure) { self.failure = Some(failure); }

    /// Detach and return the current failure.
    pub fn take_failure(&mut self) -> Option<Failure> { self.failure.take() }

    /// Failure suppressed by the error handler (handled, continued or
    /// dead-lettered), kept for inspection by downstream stages.
    #[must_use]
    pub fn caught_failure(&self) -> Option<&Failure> { self.caught_failure.as_ref() }

    /// Route on which the caught failure occurred.
    #[must_use]
    pub fn failure_route_id(&self) -> Option<&str> { self.failure_route_id.as_deref() }

    /// Returns `true` if a failure was suppressed and routing continued.
    #[must_use]
    pub fn is_continued(&self) -> bool { self.continued }

    /// Returns `true` if routing must stop for this exchange.
    #[must_use]
    pub fn is_route_stop(&self) -> bool { self.route_stop }

    /// Request that routing stops after the current stage.
    pub fn set_route_stop(&mut self, stop: bool) { self.route_stop = stop; }

    /// Returns `true` once redelivery was exhausted for this exchange.
    #[must_use]
    pub fn is_redelivery_exhausted(&self) -> bool { self.redelivery_exhausted }

    pub(crate) fn mark_continued(&mut self) { self.continued = true; }

    pub(crate) fn mark_redelivery_exhausted(&mut self) { self.redelivery_exhausted = true; }

    /// Move the attached failure into the caught slot.
    pub(crate) fn suppress_failure(&mut self, failure: Failure, route_id: Option<Arc<str>>) {
        self.failure = None;
        self.caught_failure = Some(failure);
        self.failure_route_id = route_id;
    }

    pub(crate) fn clear_redelivery_headers(&mut self) {
        for name in headers::BOOKKEEPING {
            self.message.remove_header(name);
        }
    }
}
