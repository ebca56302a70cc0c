//! Registry keys.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{failure::FailureType, predicate::SharedPredicate};

/// Identity of a registry entry: `(route scope, exception type, guard)`.
///
/// A missing scope makes the entry global. Guards compare by identity, so
/// two distinct closures with the same body are different keys.
#[derive(Clone)]
pub struct ExceptionPolicyKey {
    route_scope: Option<Arc<str>>,
    exception: FailureType,
    guard: Option<SharedPredicate>,
}

impl ExceptionPolicyKey {
    /// Create a key.
    #[must_use]
    pub fn new(
        route_scope: Option<Arc<str>>,
        exception: FailureType,
        guard: Option<SharedPredicate>,
    ) -> Self {
        Self {
            route_scope,
            exception,
            guard,
        }
    }

    /// Route scope, or `None` for a global entry.
    #[must_use]
    pub fn route_scope(&self) -> Option<&str> { self.route_scope.as_deref() }

    /// Exception type claimed by the entry.
    #[must_use]
    pub fn exception(&self) -> &FailureType { &self.exception }

    /// Guard that must hold for the entry to match.
    #[must_use]
    pub fn guard(&self) -> Option<&SharedPredicate> { self.guard.as_ref() }

    fn guard_addr(&self) -> Option<usize> { self.guard.as_ref().map(SharedPredicate::addr) }
}

impl PartialEq for ExceptionPolicyKey {
    fn eq(&self, other: &Self) -> bool {
        self.route_scope == other.route_scope
            && self.exception == other.exception
            && self.guard_addr() == other.guard_addr()
    }
}

impl Eq for ExceptionPolicyKey {}

impl Hash for ExceptionPolicyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.route_scope.hash(state);
        self.exception.hash(state);
        self.guard_addr().hash(state);
    }
}

impl fmt::Debug for ExceptionPolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionPolicyKey")
            .field("route_scope", &self.route_scope)
            .field("exception", &self.exception.name())
            .field("guard", &self.guard)
            .finish()
    }
}
