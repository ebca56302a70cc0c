//! The exception policy value object and its builder.

use std::{collections::HashMap, fmt, sync::Arc};

use super::ExceptionPolicyKey;
use crate::{
    error::ConfigError,
    exchange::Exchange,
    failure::FailureType,
    hooks::{ExchangeHook, PolicyHooks},
    predicate::SharedPredicate,
    redelivery::{RedeliveryOverrides, RedeliveryPolicy},
    stage::{SharedStage, Stage},
};

/// How a matched failure is treated.
///
/// Built once through [`ExceptionPolicyBuilder`] and shared read-only by
/// every episode that matches it.
pub struct ExceptionPolicy {
    id: Arc<str>,
    route_scope: Option<Arc<str>>,
    exceptions: Vec<FailureType>,
    guard: Option<SharedPredicate>,
    handled: Option<SharedPredicate>,
    continued: Option<SharedPredicate>,
    retry_while: Option<SharedPredicate>,
    hooks: PolicyHooks,
    use_original_message: bool,
    use_original_body: bool,
    failure_processor: Option<SharedStage>,
    redelivery_ref: Option<Arc<str>>,
    redelivery: RedeliveryPolicy,
}

impl ExceptionPolicy {
    /// Start building a policy with the given id.
    pub fn builder(id: impl Into<Arc<str>>) -> ExceptionPolicyBuilder {
        ExceptionPolicyBuilder::new(id)
    }

    /// Owning id.
    #[must_use]
    pub fn id(&self) -> &str { &self.id }

    /// Route scope, or `None` when the policy is global.
    #[must_use]
    pub fn route_scope(&self) -> Option<&str> { self.route_scope.as_deref() }

    /// Exception types claimed by the policy.
    #[must_use]
    pub fn exceptions(&self) -> &[FailureType] { &self.exceptions }

    /// Registry keys, one per claimed exception type.
    pub fn keys(&self) -> impl Iterator<Item = ExceptionPolicyKey> + '_ {
        self.exceptions.iter().map(|exception| {
            ExceptionPolicyKey::new(
                self.route_scope.clone(),
                exception.clone(),
                self.guard.clone(),
            )
        })
    }

    /// Resolved redelivery parameters.
    #[must_use]
    pub fn redelivery(&self) -> &RedeliveryPolicy { &self.redelivery }

    /// Name of the referenced redelivery policy, if one was used.
    #[must_use]
    pub fn redelivery_ref(&self) -> Option<&str> { self.redelivery_ref.as_deref() }

    /// Hooks fired while handling a matched failure.
    #[must_use]
    pub fn hooks(&self) -> &PolicyHooks { &self.hooks }

    /// Restore the whole original message before exhaustion handling.
    #[must_use]
    pub fn use_original_message(&self) -> bool { self.use_original_message }

    /// Restore only the original body before exhaustion handling.
    #[must_use]
    pub fn use_original_body(&self) -> bool { self.use_original_body }

    /// Whether the matched branch has further stages of its own.
    #[must_use]
    pub fn has_outputs(&self) -> bool { self.failure_processor.is_some() }

    /// Stage that receives the exchange when redeliveries are exhausted,
    /// in place of the handler's fallback destination.
    #[must_use]
    pub fn failure_processor(&self) -> Option<&SharedStage> { self.failure_processor.as_ref() }

    /// Evaluate the `continued` condition.
    #[must_use]
    pub fn is_continued(&self, exchange: &Exchange) -> bool { holds(self.continued.as_ref(), exchange) }

    /// Evaluate the `handled` condition.
    #[must_use]
    pub fn is_handled(&self, exchange: &Exchange) -> bool { holds(self.handled.as_ref(), exchange) }

    /// Evaluate `retry_while`; `true` when absent.
    #[must_use]
    pub fn should_retry(&self, exchange: &Exchange) -> bool {
        self.retry_while
            .as_ref()
            .is_none_or(|p| guarded(p, exchange, "retry_while"))
    }
}

fn holds(predicate: Option<&SharedPredicate>, exchange: &Exchange) -> bool {
    predicate.is_some_and(|p| guarded(p, exchange, "condition"))
}

/// Evaluate a predicate, treating a panic as `false`.
pub(crate) fn guarded(predicate: &SharedPredicate, exchange: &Exchange, what: &str) -> bool {
    crate::panic::catch(|| predicate.matches(exchange)).unwrap_or_else(|panic| {
        tracing::warn!(
            predicate = what,
            exchange = %exchange.id(),
            panic = %panic,
            "predicate panicked; treating as false"
        );
        false
    })
}

impl fmt::Debug for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionPolicy")
            .field("id", &self.id)
            .field("route_scope", &self.route_scope)
            .field("exceptions", &self.exceptions)
            .field("guarded", &self.guard.is_some())
            .field("handled", &self.handled.is_some())
            .field("continued", &self.continued.is_some())
            .field("retry_while", &self.retry_while.is_some())
            .field("hooks", &self.hooks)
            .field("use_original_message", &self.use_original_message)
            .field("use_original_body", &self.use_original_body)
            .field("has_outputs", &self.has_outputs())
            .field("redelivery_ref", &self.redelivery_ref)
            .field("redelivery", &self.redelivery)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExceptionPolicy`].
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
///
/// use redelivery::{
///     exception::ExceptionPolicy,
///     failure::FailureType,
///     predicate::constant,
///     redelivery::{RedeliveryOverrides, RedeliveryPolicy},
/// };
///
/// let io = FailureType::root("IoError");
/// let policy = ExceptionPolicy::builder("io")
///     .exception(io)
///     .handled(constant(true))
///     .redelivery(RedeliveryOverrides::default().maximum_redeliveries(3))
///     .build(&RedeliveryPolicy::default(), &HashMap::new())
///     .expect("valid policy");
///
/// assert_eq!(policy.redelivery().maximum_redeliveries, 3);
/// ```
#[must_use]
pub struct ExceptionPolicyBuilder {
    id: Arc<str>,
    route_scope: Option<Arc<str>>,
    exceptions: Vec<FailureType>,
    guard: Option<SharedPredicate>,
    handled: Option<SharedPredicate>,
    continued: Option<SharedPredicate>,
    retry_while: Option<SharedPredicate>,
    hooks: PolicyHooks,
    use_original_message: bool,
    use_original_body: bool,
    failure_processor: Option<SharedStage>,
    redelivery_ref: Option<Arc<str>>,
    overrides: RedeliveryOverrides,
}

impl ExceptionPolicyBuilder {
    fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            route_scope: None,
            exceptions: Vec::new(),
            guard: None,
            handled: None,
            continued: None,
            retry_while: None,
            hooks: PolicyHooks::default(),
            use_original_message: false,
            use_original_body: false,
            failure_processor: None,
            redelivery_ref: None,
            overrides: RedeliveryOverrides::default(),
        }
    }

    /// Restrict the policy to one route.
    pub fn route_scope(mut self, route: impl Into<Arc<str>>) -> Self {
        self.route_scope = Some(route.into());
        self
    }

    /// Claim an exception type. May be called repeatedly.
    pub fn exception(mut self, kind: FailureType) -> Self {
        self.exceptions.push(kind);
        self
    }

    /// Claim several exception types.
    pub fn exceptions(mut self, kinds: impl IntoIterator<Item = FailureType>) -> Self {
        self.exceptions.extend(kinds);
        self
    }

    /// Match only when `guard` holds.
    pub fn on_when(mut self, guard: SharedPredicate) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Suppress the failure and stop routing when `condition` holds.
    pub fn handled(mut self, condition: SharedPredicate) -> Self {
        self.handled = Some(condition);
        self
    }

    /// Suppress the failure and keep routing when `condition` holds.
    pub fn continued(mut self, condition: SharedPredicate) -> Self {
        self.continued = Some(condition);
        self
    }

    /// Keep redelivering only while `condition` holds.
    pub fn retry_while(mut self, condition: SharedPredicate) -> Self {
        self.retry_while = Some(condition);
        self
    }

    /// Hook run before each redelivery.
    pub fn on_redelivery(mut self, hook: impl ExchangeHook) -> Self {
        self.hooks.on_redelivery = Some(Arc::new(hook));
        self
    }

    /// Hook run once when a failure matches.
    pub fn on_exception_occurred(mut self, hook: impl ExchangeHook) -> Self {
        self.hooks.on_exception_occurred = Some(Arc::new(hook));
        self
    }

    /// Restore the original message on exhaustion.
    pub fn use_original_message(mut self, enabled: bool) -> Self {
        self.use_original_message = enabled;
        self
    }

    /// Restore the original body on exhaustion.
    pub fn use_original_body(mut self, enabled: bool) -> Self {
        self.use_original_body = enabled;
        self
    }

    /// Route exhausted exchanges through `stage` instead of the handler's
    /// fallback destination. Failures and panics raised by the stage are
    /// logged and swallowed.
    pub fn failure_processor(mut self, stage: impl Stage) -> Self {
        self.failure_processor = Some(Arc::new(stage));
        self
    }

    /// Use a named redelivery policy.
    pub fn redelivery_ref(mut self, name: impl Into<Arc<str>>) -> Self {
        self.redelivery_ref = Some(name.into());
        self
    }

    /// Derive the redelivery policy from the handler default.
    pub fn redelivery(mut self, overrides: RedeliveryOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Validate and resolve the policy.
    ///
    /// `parent` is the policy inline overrides apply to; `named` holds the
    /// policies a `redelivery_ref` may point at.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when no exception type is claimed, when both
    /// a reference and inline overrides are set, when the reference is
    /// unknown, or when the resolved redelivery policy is invalid.
    pub fn build(
        self,
        parent: &RedeliveryPolicy,
        named: &HashMap<String, RedeliveryPolicy>,
    ) -> Result<ExceptionPolicy, ConfigError> {
        let id = self.id.to_string();
        if self.exceptions.is_empty() {
            return Err(ConfigError::NoExceptionTypes(id));
        }
        if self.use_original_message && self.use_original_body {
            return Err(ConfigError::ConflictingOriginalRestore(id));
        }
        let redelivery = match &self.redelivery_ref {
            Some(_) if !self.overrides.is_empty() => {
                return Err(ConfigError::ConflictingRedeliveryPolicy(id));
            }
            Some(reference) => named.get(reference.as_ref()).cloned().ok_or_else(|| {
                ConfigError::MissingRedeliveryPolicy {
                    policy: id.clone(),
                    reference: reference.to_string(),
                }
            })?,
            None => self.overrides.apply(parent),
        };
        redelivery.validate()?;

        Ok(ExceptionPolicy {
            id: self.id,
            route_scope: self.route_scope,
            exceptions: self.exceptions,
            guard: self.guard,
            handled: self.handled,
            continued: self.continued,
            retry_while: self.retry_while,
            hooks: self.hooks,
            use_original_message: self.use_original_message,
            use_original_body: self.use_original_body,
            failure_processor: self.failure_processor,
            redelivery_ref: self.redelivery_ref,
            redelivery,
        })
    }
}
