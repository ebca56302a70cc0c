//! Shared fixtures for testing `redelivery` error handlers.
//!
//! The stage and producer doubles record every call so tests can assert on
//! what the handler did: how often a stage ran, with which body and headers,
//! and at what (virtual) time.
//!
//! ```rust
//! use redelivery::FailureType;
//! use redelivery_testing::FlakyStage;
//!
//! let stage = FlakyStage::new(FailureType::root("IoError"), 2);
//! assert_eq!(stage.calls(), 0);
//! ```

mod failures;
mod logging;
mod producer;
mod stage;

pub use failures::{Hierarchy, hierarchy};
pub use logging::{LoggerHandle, logger};
pub use producer::{ProducerMode, RecordingProducer};
pub use stage::FlakyStage;

/// Result alias for fallible tests.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
