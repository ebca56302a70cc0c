//! Configuration errors raised while assembling policies and handlers.
//!
//! These are fatal at build time. Runtime problems (a failing hook, a
//! fallback destination that refuses a message) are never reported through
//! this type; they are logged and swallowed by the engine.

use thiserror::Error;

/// Errors detected while validating redelivery and exception policies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A delay pattern could not be parsed.
    #[error("invalid delay pattern {pattern:?}: {reason}")]
    InvalidDelayPattern {
        /// Offending text.
        pattern: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The collision avoidance factor lies outside `(0, 1)`.
    #[error("collision avoidance factor {0} must lie strictly between 0 and 1")]
    InvalidCollisionAvoidanceFactor(f64),
    /// The back-off multiplier is below 1 or not finite.
    #[error("back-off multiplier {0} must be a finite value >= 1")]
    InvalidBackOffMultiplier(f64),
    /// An exception policy names a redelivery policy that was never registered.
    #[error("exception policy {policy:?} references unknown redelivery policy {reference:?}")]
    MissingRedeliveryPolicy {
        /// Owning policy id.
        policy: String,
        /// Name of the missing redelivery policy.
        reference: String,
    },
    /// An exception policy sets both a named reference and inline overrides.
    #[error("exception policy {0:?} sets both a redelivery policy reference and inline overrides")]
    ConflictingRedeliveryPolicy(String),
    /// An exception policy claims no exception types.
    #[error("exception policy {0:?} does not name any exception type")]
    NoExceptionTypes(String),
    /// Both `use_original_message` and `use_original_body` were requested.
    #[error("exception policy {0:?} cannot restore both the original message and body")]
    ConflictingOriginalRestore(String),
    /// Two policies were registered under the same key.
    #[error("duplicate exception policy for {exception} (scope {scope:?})")]
    DuplicatePolicy {
        /// Route scope of the clashing key.
        scope: Option<String>,
        /// Exception type of the clashing key.
        exception: String,
    },
    /// A named redelivery policy was registered twice.
    #[error("redelivery policy {0:?} registered twice")]
    DuplicateRedeliveryPolicy(String),
}
