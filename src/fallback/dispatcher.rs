//! Fault-isolated fallback delivery.

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use super::Producer;
use crate::{exchange::Exchange, panic};

/// Throttling applied to fallback failure warnings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackConfig {
    /// Log every n-th failure.
    ///
    /// Default: 100.
    pub log_every_n: usize,
    /// Log at least once per interval while failures continue.
    ///
    /// Default: 10 seconds.
    pub log_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            log_every_n: 100,
            log_interval: Duration::from_secs(10),
        }
    }
}

impl FallbackConfig {
    /// Set how many failures pass between warnings.
    #[must_use]
    pub fn log_every_n(mut self, n: usize) -> Self {
        self.log_every_n = n.max(1);
        self
    }

    /// Set the maximum time between warnings.
    #[must_use]
    pub fn log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }
}

/// Sends exhausted exchanges to the fallback destination without ever
/// failing the caller.
pub struct FallbackDispatcher {
    destination: Arc<str>,
    producer: Arc<dyn Producer>,
    config: FallbackConfig,
    suppressed: AtomicUsize,
    last_log: Mutex<Option<Instant>>,
    failures_total: AtomicU64,
}

impl FallbackDispatcher {
    /// Create a dispatcher for `destination`.
    pub fn new(destination: impl Into<Arc<str>>, producer: Arc<dyn Producer>) -> Self {
        Self::with_config(destination, producer, FallbackConfig::default())
    }

    /// Create a dispatcher with explicit log throttling.
    pub fn with_config(
        destination: impl Into<Arc<str>>,
        producer: Arc<dyn Producer>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            destination: destination.into(),
            producer,
            config,
            suppressed: AtomicUsize::new(0),
            last_log: Mutex::new(None),
            failures_total: AtomicU64::new(0),
        }
    }

    /// Destination identifier.
    #[must_use]
    pub fn destination(&self) -> &str { &self.destination }

    /// Deliveries that failed since creation.
    #[must_use]
    pub fn failures(&self) -> u64 { self.failures_total.load(Ordering::Relaxed) }

    /// Send a copy of `exchange` to the fallback destination.
    ///
    /// Returns `true` when the producer accepted it. Errors and panics are
    /// contained here.
    pub async fn deliver(&self, exchange: &Exchange) -> bool {
        let id = exchange.id();
        let send = self.producer.send(&self.destination, exchange.clone());
        match panic::catch_async(send).await {
            Ok(Ok(())) => {
                debug!(exchange = %id, destination = %self.destination, "delivered to fallback");
                true
            }
            Ok(Err(failure)) => {
                self.record_failure(id, &failure);
                false
            }
            Err(panic) => {
                self.record_failure(id, &format_args!("producer panicked: {panic}"));
                false
            }
        }
    }

    fn record_failure(&self, exchange: crate::exchange::ExchangeId, reason: &dyn fmt::Display) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        let failed = self.suppressed.fetch_add(1, Ordering::Relaxed) + 1;
        let log_every_n = self.config.log_every_n.max(1);
        let log_interval = self.config.log_interval;
        let mut last = self.last_log.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let due = last.is_none_or(|at| now.duration_since(at) > log_interval);
        if failed.is_multiple_of(log_every_n) || due {
            warn!(
                %exchange,
                destination = %self.destination,
                reason = %reason,
                failed,
                log_every_n,
                log_interval = ?log_interval,
                "fallback delivery failed; exchange dropped"
            );
            *last = Some(now);
            self.suppressed.store(0, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for FallbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDispatcher")
            .field("destination", &self.destination)
            .field("config", &self.config)
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}
