//! Lookup of exception policies by route scope, failure lineage and guard.

use std::{collections::HashMap, sync::Arc};

use tracing::trace;

use super::{ExceptionPolicy, ExceptionPolicyKey, policy::guarded};
use crate::{error::ConfigError, exchange::Exchange, failure::FailureType};

struct Entry {
    key: ExceptionPolicyKey,
    policy: Arc<ExceptionPolicy>,
}

impl Entry {
    fn matches(&self, exchange: &Exchange) -> bool {
        self.key
            .guard()
            .is_none_or(|guard| guarded(guard, exchange, "on_when"))
    }
}

/// Entries claiming one exception type.
#[derive(Default)]
struct Level {
    scoped: HashMap<Arc<str>, Vec<Entry>>,
    global: Vec<Entry>,
}

impl Level {
    fn bucket_mut(&mut self, scope: Option<&Arc<str>>) -> &mut Vec<Entry> {
        match scope {
            Some(scope) => self.scoped.entry(Arc::clone(scope)).or_default(),
            None => &mut self.global,
        }
    }
}

/// Insert keeping guarded entries ahead of unguarded ones, each group in
/// registration order.
fn insert(bucket: &mut Vec<Entry>, entry: Entry) {
    let at = if entry.key.guard().is_some() {
        bucket.partition_point(|e| e.key.guard().is_some())
    } else {
        bucket.len()
    };
    bucket.insert(at, entry);
}

fn first_match<'a>(bucket: &'a [Entry], exchange: &Exchange) -> Option<&'a Arc<ExceptionPolicy>> {
    bucket.iter().find(|e| e.matches(exchange)).map(|e| &e.policy)
}

/// Immutable map from [`ExceptionPolicyKey`] to [`ExceptionPolicy`].
///
/// Populate it with [`register`](Self::register) while assembling a handler;
/// afterwards it is shared behind an `Arc` and only read.
///
/// ```
/// use std::{collections::HashMap, sync::Arc};
///
/// use redelivery::{
///     exception::{ExceptionPolicy, ExceptionPolicyRegistry},
///     exchange::Exchange,
///     failure::FailureType,
///     redelivery::RedeliveryPolicy,
/// };
///
/// let error = FailureType::root("Error");
/// let io = error.subtype("IoError");
/// let policy = ExceptionPolicy::builder("errors")
///     .exception(error)
///     .build(&RedeliveryPolicy::default(), &HashMap::new())
///     .expect("valid policy");
///
/// let mut registry = ExceptionPolicyRegistry::new();
/// registry.register_policy(Arc::new(policy)).expect("no duplicates");
///
/// let found = registry.find(None, &io, &Exchange::new("x"));
/// assert_eq!(found.map(|p| p.id()), Some("errors"));
/// ```
#[derive(Default)]
pub struct ExceptionPolicyRegistry {
    levels: HashMap<Arc<str>, Level>,
    len: usize,
}

impl ExceptionPolicyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicatePolicy`] if `key` is already present.
    pub fn register(
        &mut self,
        key: ExceptionPolicyKey,
        policy: Arc<ExceptionPolicy>,
    ) -> Result<(), ConfigError> {
        let scope = key.route_scope().map(Arc::<str>::from);
        let level = self
            .levels
            .entry(Arc::from(key.exception().name()))
            .or_default();
        let bucket = level.bucket_mut(scope.as_ref());
        if bucket.iter().any(|e| e.key == key) {
            return Err(ConfigError::DuplicatePolicy {
                scope: key.route_scope().map(str::to_owned),
                exception: key.exception().name().to_owned(),
            });
        }
        insert(bucket, Entry { key, policy });
        self.len += 1;
        Ok(())
    }

    /// Add one entry per exception type claimed by `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicatePolicy`] if any key is already present.
    pub fn register_policy(&mut self, policy: Arc<ExceptionPolicy>) -> Result<(), ConfigError> {
        for key in policy.keys() {
            self.register(key, Arc::clone(&policy))?;
        }
        Ok(())
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize { self.len }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Resolve the policy for a failure of type `thrown` raised on
    /// `route_scope`.
    ///
    /// The lineage of `thrown` is walked from the concrete type to the root.
    /// At each level route-scoped entries are tried before global ones, and
    /// within a bucket guarded entries before unguarded ones. The first entry
    /// whose guard holds wins.
    #[must_use]
    pub fn find(
        &self,
        route_scope: Option<&str>,
        thrown: &FailureType,
        exchange: &Exchange,
    ) -> Option<&Arc<ExceptionPolicy>> {
        thrown.lineage().find_map(|name| {
            let level = self.levels.get(name)?;
            let scoped = route_scope
                .and_then(|scope| level.scoped.get(scope))
                .and_then(|bucket| first_match(bucket, exchange));
            let found = scoped.or_else(|| first_match(&level.global, exchange));
            if let Some(policy) = found {
                trace!(thrown = %thrown, level = name, policy = policy.id(), "exception policy matched");
            }
            found
        })
    }
}

impl std::fmt::Debug for ExceptionPolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionPolicyRegistry")
            .field("types", &self.levels.len())
            .field("entries", &self.len)
            .finish()
    }
}
