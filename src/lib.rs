#![doc(html_root_url = "https://docs.rs/redelivery/latest")]
//! Exception-policy resolution and redelivery for message pipelines.
//!
//! A pipeline stage that fails hands its [`Failure`] to an [`ErrorHandler`].
//! The handler resolves the [`ExceptionPolicy`] that best matches the
//! failure's type lineage and the exchange, then redelivers the exchange with
//! the policy's back-off, suppresses the failure, or diverts the exchange to
//! a fallback destination once redeliveries are exhausted.
//!
//! ```
//! use std::{
//!     sync::{
//!         Arc,
//!         atomic::{AtomicUsize, Ordering},
//!     },
//!     time::Duration,
//! };
//!
//! use redelivery::{
//!     Disposition,
//!     ErrorHandler,
//!     ExceptionPolicy,
//!     Exchange,
//!     Failure,
//!     FailureType,
//!     RedeliveryOverrides,
//!     fallback::ChannelProducer,
//!     stage::stage_fn,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let io = FailureType::root("IoError");
//! let kind = io.clone();
//! let stage = stage_fn(move |_: &mut Exchange| -> Result<(), Failure> {
//!     Err(Failure::new(kind.clone(), "disk unavailable"))
//! });
//! let (producer, mut dead_letters) = ChannelProducer::channel(16);
//!
//! let handler = ErrorHandler::builder(stage)
//!     .exception_policy(
//!         ExceptionPolicy::builder("io").exception(io).redelivery(
//!             RedeliveryOverrides::default()
//!                 .maximum_redeliveries(2)
//!                 .redelivery_delay(Duration::ZERO),
//!         ),
//!     )
//!     .dead_letter("dlq:orders", Arc::new(producer))
//!     .build()
//!     .expect("valid configuration");
//!
//! let mut exchange = Exchange::new("order-17");
//! let outcome = handler.process(&mut exchange).await;
//! assert_eq!(outcome.ok(), Some(Disposition::DeadLettered));
//! assert!(dead_letters.try_recv().is_ok());
//! # }
//! ```

pub mod error;
pub mod exception;
pub mod exchange;
pub mod failure;
pub mod fallback;
pub mod handler;
pub mod hooks;
pub mod metrics;
pub mod panic;
pub mod pipeline;
pub mod predicate;
pub mod redelivery;
pub mod scheduler;
pub mod stage;

pub use error::ConfigError;
pub use exception::{
    ExceptionPolicy,
    ExceptionPolicyBuilder,
    ExceptionPolicyKey,
    ExceptionPolicyRegistry,
};
pub use exchange::{Exchange, ExchangeId, Message};
pub use failure::{Failure, FailureType};
pub use fallback::{ChannelProducer, DeadLetter, FallbackConfig, FallbackDispatcher, Producer};
pub use handler::{
    Completion,
    Disposition,
    EpisodeState,
    ErrorHandler,
    ErrorHandlerBuilder,
    RedeliveryState,
    StatsSnapshot,
    Submitted,
};
pub use hooks::ExchangeHook;
pub use metrics::{
    EPISODES_TOTAL,
    FALLBACK_FAILURES_TOTAL,
    PENDING_REDELIVERIES,
    REDELIVERIES_TOTAL,
};
pub use pipeline::Pipeline;
pub use predicate::{Predicate, SharedPredicate};
pub use redelivery::{DelayPattern, LoggingLevel, RedeliveryOverrides, RedeliveryPolicy};
pub use scheduler::{ScheduleError, Scheduler, TokioScheduler, Wakeup};
pub use stage::{Stage, stage_fn};
