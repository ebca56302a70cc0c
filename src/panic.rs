//! Panic containment for user-supplied callbacks.
//!
//! Callbacks, predicates and producers are foreign code from the engine's
//! point of view. A panic inside one of them must never unwind through a
//! redelivery episode, so every call site funnels through [`catch`] or
//! [`catch_async`] and logs the resulting [`PanicMessage`].

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
};

use futures::FutureExt;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to `Debug` formatting otherwise.
///
/// ```
/// use redelivery::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// assert!(format_panic(Box::new(5_u32)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Run `f`, converting a panic into a [`PanicMessage`].
///
/// # Errors
///
/// Returns the formatted payload if `f` panics.
pub fn catch<T>(f: impl FnOnce() -> T) -> Result<T, PanicMessage> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(format_panic)
}

/// Await `fut`, converting a panic raised while polling into a
/// [`PanicMessage`].
///
/// # Errors
///
/// Returns the formatted payload if polling `fut` panics.
pub async fn catch_async<F: Future>(fut: F) -> Result<F::Output, PanicMessage> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(format_panic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_passes_values_through() {
        assert_eq!(catch(|| 7).ok(), Some(7));
    }

    #[test]
    fn catch_formats_payload() {
        let err = catch(|| -> u8 { panic!("predicate exploded") }).expect_err("must panic");
        assert_eq!(err.to_string(), "predicate exploded");
    }

    async fn explode() -> u8 { panic!("producer exploded") }

    #[tokio::test]
    async fn catch_async_formats_payload() {
        let err = catch_async(explode()).await.expect_err("must panic");
        assert_eq!(err.to_string(), "producer exploded");
    }
}
