//! Boolean tests evaluated against an exchange.
//!
//! Predicates guard exception policies (`on_when`) and drive `retry_while`.
//! Any `Fn(&Exchange) -> bool` closure is a predicate.

use std::{fmt, sync::Arc};

use crate::exchange::Exchange;

/// A side-effect free test over an exchange.
pub trait Predicate: Send + Sync + 'static {
    /// Evaluate the predicate.
    fn matches(&self, exchange: &Exchange) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Exchange) -> bool + Send + Sync + 'static,
{
    fn matches(&self, exchange: &Exchange) -> bool { self(exchange) }
}

/// Shared, type-erased predicate.
///
/// Two shared predicates are the same guard only when they point at the same
/// allocation, which is how [`ExceptionPolicyKey`](crate::exception::ExceptionPolicyKey)
/// tells guards apart.
#[derive(Clone)]
pub struct SharedPredicate(Arc<dyn Predicate>);

impl SharedPredicate {
    /// Wrap a predicate.
    pub fn new(predicate: impl Predicate) -> Self { Self(Arc::new(predicate)) }

    /// Evaluate the wrapped predicate.
    #[must_use]
    pub fn matches(&self, exchange: &Exchange) -> bool { self.0.matches(exchange) }

    /// Returns `true` if both handles refer to the same predicate.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }

    pub(crate) fn addr(&self) -> usize { Arc::as_ptr(&self.0).cast::<()>() as usize }
}

impl fmt::Debug for SharedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedPredicate({:#x})", self.addr())
    }
}

/// Predicate that always yields `value`.
#[must_use]
pub fn constant(value: bool) -> SharedPredicate { SharedPredicate::new(move |_: &Exchange| value) }

/// Predicate that is true when `header` is present and equal to `value`.
#[must_use]
pub fn header_equals(header: impl Into<String>, value: impl Into<String>) -> SharedPredicate {
    let header = header.into();
    let value = value.into();
    SharedPredicate::new(move |exchange: &Exchange| exchange.header(&header) == Some(value.as_str()))
}
