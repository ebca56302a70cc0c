//! Fluent configuration for [`ErrorHandler`].

use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicUsize},
};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{ErrorHandler, HandlerShared, HandlerStats};
use crate::{
    error::ConfigError,
    exception::{ExceptionPolicyBuilder, ExceptionPolicyRegistry},
    fallback::{FallbackConfig, FallbackDispatcher, Producer},
    hooks::{ExchangeHook, SharedHook},
    redelivery::RedeliveryPolicy,
    scheduler::{Scheduler, TokioScheduler},
    stage::SharedStage,
};

/// Builder for [`ErrorHandler`], obtained from [`ErrorHandler::builder`].
///
/// Exception policies are resolved at [`build`](Self::build) time, once all
/// named redelivery policies are known, so registration order does not
/// matter.
#[must_use]
pub struct ErrorHandlerBuilder {
    stage: SharedStage,
    route_id: Option<Arc<str>>,
    default_policy: RedeliveryPolicy,
    named: HashMap<String, RedeliveryPolicy>,
    duplicate_named: Option<String>,
    policies: Vec<ExceptionPolicyBuilder>,
    registry: ExceptionPolicyRegistry,
    dead_letter: Option<(Arc<str>, Arc<dyn Producer>)>,
    fallback_config: FallbackConfig,
    on_prepare_failure: Option<SharedHook>,
    scheduler: Option<Arc<dyn Scheduler>>,
    capture_original: bool,
}

impl ErrorHandlerBuilder {
    pub(super) fn new(stage: SharedStage) -> Self {
        Self {
            stage,
            route_id: None,
            default_policy: RedeliveryPolicy::default(),
            named: HashMap::new(),
            duplicate_named: None,
            policies: Vec::new(),
            registry: ExceptionPolicyRegistry::new(),
            dead_letter: None,
            fallback_config: FallbackConfig::default(),
            on_prepare_failure: None,
            scheduler: None,
            capture_original: true,
        }
    }

    /// Route the handler protects. Route-scoped policies for this route take
    /// precedence over global ones.
    pub fn route_id(mut self, route_id: impl Into<Arc<str>>) -> Self {
        self.route_id = Some(route_id.into());
        self
    }

    /// Parent policy that exception policies apply their inline
    /// [`RedeliveryOverrides`](crate::redelivery::RedeliveryOverrides) to.
    /// A failure no exception policy matches is never redelivered; it
    /// propagates straight away.
    ///
    /// Default: [`RedeliveryPolicy::default`], which never redelivers.
    pub fn default_redelivery_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Register a named policy exception policies may reference.
    pub fn redelivery_policy(mut self, name: impl Into<String>, policy: RedeliveryPolicy) -> Self {
        let name = name.into();
        if self.named.contains_key(&name) {
            self.duplicate_named.get_or_insert(name);
        } else {
            self.named.insert(name, policy);
        }
        self
    }

    /// Add an exception policy.
    pub fn exception_policy(mut self, policy: ExceptionPolicyBuilder) -> Self {
        self.policies.push(policy);
        self
    }

    /// Start from a registry of already resolved policies.
    pub fn registry(mut self, registry: ExceptionPolicyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Divert exhausted exchanges to `destination` through `producer`.
    ///
    /// Without a dead-letter destination, exhausted failures propagate to the
    /// caller.
    pub fn dead_letter(mut self, destination: impl Into<Arc<str>>, producer: Arc<dyn Producer>) -> Self {
        self.dead_letter = Some((destination.into(), producer));
        self
    }

    /// Throttling for fallback delivery warnings.
    pub fn fallback_config(mut self, config: FallbackConfig) -> Self {
        self.fallback_config = config;
        self
    }

    /// Hook run just before an exchange is handed to the fallback
    /// destination.
    pub fn on_prepare_failure(mut self, hook: impl ExchangeHook) -> Self {
        self.on_prepare_failure = Some(Arc::new(hook));
        self
    }

    /// Scheduler used for asynchronous redelivery.
    ///
    /// Default: a [`TokioScheduler`] stopped together with the handler.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Snapshot the message on entry so exhausted exchanges can restore it.
    ///
    /// A snapshot already taken by an enclosing pipeline is kept.
    ///
    /// Default: `true`.
    pub fn capture_original(mut self, enabled: bool) -> Self {
        self.capture_original = enabled;
        self
    }

    /// Validate the configuration and build the handler.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any redelivery policy is invalid, a named
    /// policy was registered twice, an exception policy cannot be resolved,
    /// or two exception policies claim the same key.
    pub fn build(self) -> Result<ErrorHandler, ConfigError> {
        if let Some(name) = self.duplicate_named {
            return Err(ConfigError::DuplicateRedeliveryPolicy(name));
        }
        self.default_policy.validate()?;
        for policy in self.named.values() {
            policy.validate()?;
        }

        let mut registry = self.registry;
        for builder in self.policies {
            let policy = builder.build(&self.default_policy, &self.named)?;
            registry.register_policy(Arc::new(policy))?;
        }

        let fallback = self.dead_letter.map(|(destination, producer)| {
            FallbackDispatcher::with_config(destination, producer, self.fallback_config)
        });
        let stopping = CancellationToken::new();
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::with_token(stopping.clone())),
        };

        Ok(ErrorHandler {
            shared: Arc::new(HandlerShared {
                stage: self.stage,
                route_id: self.route_id,
                registry,
                default_policy: self.default_policy,
                fallback,
                on_prepare_failure: self.on_prepare_failure,
                scheduler,
                stopping,
                tracker: TaskTracker::new(),
                stats: HandlerStats::default(),
                pending: AtomicUsize::new(0),
                capture_original: self.capture_original,
            }),
        })
    }
}
