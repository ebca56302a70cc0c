//! Callbacks invoked on an exchange while a failure is being handled.
//!
//! [`ExchangeHook`] is the public interface applications implement (any
//! matching closure qualifies). [`PolicyHooks`] stores the optional hooks an
//! exception policy carries and runs them with failure and panic isolation:
//! a hook that errors or panics is logged and otherwise ignored, and the
//! episode carries on with the primary failure.

use std::{fmt, sync::Arc};

use tracing::warn;

use crate::{exchange::Exchange, failure::Failure, panic};

/// Callback invoked with the exchange and the failure being handled.
///
/// ```
/// use redelivery::{exchange::Exchange, failure::Failure, hooks::ExchangeHook};
///
/// fn tag(exchange: &mut Exchange, failure: &Failure) -> Result<(), Failure> {
///     exchange.set_header("LastFailure", failure.kind());
///     Ok(())
/// }
///
/// let hook: &dyn ExchangeHook = &tag;
/// # let _ = hook;
/// ```
pub trait ExchangeHook: Send + Sync + 'static {
    /// Handle the event.
    ///
    /// # Errors
    ///
    /// Errors are logged by the engine and never replace the primary failure.
    fn on_event(&self, exchange: &mut Exchange, failure: &Failure) -> Result<(), Failure>;
}

impl<F> ExchangeHook for F
where
    F: Fn(&mut Exchange, &Failure) -> Result<(), Failure> + Send + Sync + 'static,
{
    fn on_event(&self, exchange: &mut Exchange, failure: &Failure) -> Result<(), Failure> {
        self(exchange, failure)
    }
}

/// Shared, type-erased hook.
pub type SharedHook = Arc<dyn ExchangeHook>;

/// Point in an episode at which a hook fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookPoint {
    /// A failure matched a policy.
    ExceptionOccurred,
    /// A redelivery is about to be attempted.
    Redelivery,
    /// The exchange is about to be handed to the fallback destination.
    PrepareFailure,
}

impl HookPoint {
    /// Stable name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::ExceptionOccurred => "on_exception_occurred",
            HookPoint::Redelivery => "on_redelivery",
            HookPoint::PrepareFailure => "on_prepare_failure",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Run `hook`, swallowing and logging any error or panic.
///
/// Returns `true` if the hook completed successfully.
pub(crate) fn run_guarded(
    hook: &dyn ExchangeHook,
    point: HookPoint,
    exchange: &mut Exchange,
    failure: &Failure,
) -> bool {
    match panic::catch(|| hook.on_event(exchange, failure)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(
                hook = %point,
                exchange = %exchange.id(),
                error = %e,
                primary = %failure,
                "hook failed; continuing with primary failure"
            );
            false
        }
        Err(panic) => {
            warn!(
                hook = %point,
                exchange = %exchange.id(),
                panic = %panic,
                primary = %failure,
                "hook panicked; continuing with primary failure"
            );
            false
        }
    }
}

/// Hooks attached to an exception policy.
#[derive(Clone, Default)]
pub struct PolicyHooks {
    /// Invoked once when a failure is matched to the policy.
    pub on_exception_occurred: Option<SharedHook>,
    /// Invoked before each redelivery attempt.
    pub on_redelivery: Option<SharedHook>,
}

impl PolicyHooks {
    /// Run the `on_exception_occurred` hook if registered.
    pub fn exception_occurred(&self, exchange: &mut Exchange, failure: &Failure) {
        if let Some(hook) = &self.on_exception_occurred {
            run_guarded(hook.as_ref(), HookPoint::ExceptionOccurred, exchange, failure);
        }
    }

    /// Run the `on_redelivery` hook if registered.
    pub fn redelivery(&self, exchange: &mut Exchange, failure: &Failure) {
        if let Some(hook) = &self.on_redelivery {
            run_guarded(hook.as_ref(), HookPoint::Redelivery, exchange, failure);
        }
    }
}

impl fmt::Debug for PolicyHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyHooks")
            .field("on_exception_occurred", &self.on_exception_occurred.is_some())
            .field("on_redelivery", &self.on_redelivery.is_some())
            .finish()
    }
}
