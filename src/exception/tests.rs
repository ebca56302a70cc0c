//! Tests for exception policy resolution.

use std::{collections::HashMap, sync::Arc};

use rstest::{fixture, rstest};

use super::*;
use crate::{
    error::ConfigError,
    exchange::Exchange,
    failure::FailureType,
    predicate::{SharedPredicate, constant, header_equals},
    redelivery::{RedeliveryOverrides, RedeliveryPolicy},
};

struct Types {
    throwable: FailureType,
    exception: FailureType,
    io: FailureType,
    connect: FailureType,
}

#[fixture]
fn types() -> Types {
    let throwable = FailureType::root("Throwable");
    let exception = throwable.subtype("Exception");
    let io = exception.subtype("IoException");
    let connect = io.subtype("ConnectException");
    Types {
        throwable,
        exception,
        io,
        connect,
    }
}

fn policy(id: &str, kind: &FailureType) -> ExceptionPolicyBuilder {
    ExceptionPolicy::builder(id).exception(kind.clone())
}

fn build(builder: ExceptionPolicyBuilder) -> Arc<ExceptionPolicy> {
    Arc::new(
        builder
            .build(&RedeliveryPolicy::default(), &HashMap::new())
            .expect("valid policy"),
    )
}

fn registry(policies: impl IntoIterator<Item = ExceptionPolicyBuilder>) -> ExceptionPolicyRegistry {
    let mut registry = ExceptionPolicyRegistry::new();
    for p in policies {
        registry.register_policy(build(p)).expect("no duplicates");
    }
    registry
}

fn found<'a>(
    registry: &'a ExceptionPolicyRegistry,
    scope: Option<&str>,
    kind: &FailureType,
    ex: &Exchange,
) -> Option<&'a str> {
    registry.find(scope, kind, ex).map(|p| p.id())
}

#[rstest]
fn most_specific_ancestor_wins(types: Types) {
    let registry = registry([policy("exception", &types.exception), policy("io", &types.io)]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, None, &types.connect, &ex), Some("io"));
    assert_eq!(found(&registry, None, &types.exception, &ex), Some("exception"));
    assert_eq!(found(&registry, None, &types.throwable, &ex), None);
}

#[rstest]
fn specificity_dominates_scope(types: Types) {
    let registry = registry([
        policy("scoped-exception", &types.exception).route_scope("orders"),
        policy("global-io", &types.io),
    ]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, Some("orders"), &types.connect, &ex), Some("global-io"));
}

#[rstest]
fn scope_dominates_at_equal_specificity(types: Types) {
    let registry = registry([
        policy("global-io", &types.io),
        policy("orders-io", &types.io).route_scope("orders"),
    ]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, Some("orders"), &types.io, &ex), Some("orders-io"));
    assert_eq!(found(&registry, Some("billing"), &types.io, &ex), Some("global-io"));
    assert_eq!(found(&registry, None, &types.io, &ex), Some("global-io"));
}

#[rstest]
fn scope_dominates_guard(types: Types) {
    let registry = registry([
        policy("global-guarded", &types.io).on_when(constant(true)),
        policy("orders-plain", &types.io).route_scope("orders"),
    ]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, Some("orders"), &types.io, &ex), Some("orders-plain"));
}

#[rstest]
fn guarded_entries_are_tried_before_unguarded(types: Types) {
    let registry = registry([
        policy("plain", &types.io),
        policy("gold", &types.io).on_when(header_equals("tier", "gold")),
    ]);
    let gold = Exchange::new("x").with_header("tier", "gold");
    let silver = Exchange::new("x").with_header("tier", "silver");
    assert_eq!(found(&registry, None, &types.io, &gold), Some("gold"));
    assert_eq!(found(&registry, None, &types.io, &silver), Some("plain"));
}

#[rstest]
fn false_guard_continues_to_next_level(types: Types) {
    let registry = registry([
        policy("never", &types.connect).on_when(constant(false)),
        policy("exception", &types.exception),
    ]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, None, &types.connect, &ex), Some("exception"));
}

#[rstest]
fn panicking_guard_is_a_non_match(types: Types) {
    let boom = SharedPredicate::new(|_: &Exchange| -> bool { panic!("guard exploded") });
    let registry = registry([
        policy("boom", &types.io).on_when(boom),
        policy("fallback", &types.exception),
    ]);
    let ex = Exchange::new("x");
    assert_eq!(found(&registry, None, &types.io, &ex), Some("fallback"));
}

#[rstest]
fn unrelated_types_do_not_match(types: Types) {
    let registry = registry([policy("io", &types.io)]);
    let other = FailureType::root("Throwable").subtype("ValidationException");
    assert!(registry.find(None, &other, &Exchange::new("x")).is_none());
}

#[rstest]
fn duplicate_keys_are_rejected(types: Types) {
    let mut registry = ExceptionPolicyRegistry::new();
    registry.register_policy(build(policy("a", &types.io))).expect("first registration");
    let err = registry
        .register_policy(build(policy("b", &types.io)))
        .expect_err("duplicate must fail");
    assert_eq!(
        err,
        ConfigError::DuplicatePolicy {
            scope: None,
            exception: "IoException".into()
        }
    );
}

#[rstest]
fn distinct_guards_are_distinct_keys(types: Types) {
    let mut registry = ExceptionPolicyRegistry::new();
    registry
        .register_policy(build(policy("a", &types.io).on_when(constant(true))))
        .expect("first guard");
    registry
        .register_policy(build(policy("b", &types.io).on_when(constant(true))))
        .expect("second guard");
    registry
        .register_policy(build(policy("c", &types.io).route_scope("orders")))
        .expect("scoped");
    assert_eq!(registry.len(), 3);
}

#[rstest]
fn one_key_per_claimed_type(types: Types) {
    let p = build(policy("multi", &types.io).exception(types.throwable.clone()));
    assert_eq!(p.keys().count(), 2);
}

#[rstest]
fn missing_reference_is_a_config_error(types: Types) {
    let err = policy("io", &types.io)
        .redelivery_ref("slow")
        .build(&RedeliveryPolicy::default(), &HashMap::new())
        .expect_err("unknown reference");
    assert!(matches!(err, ConfigError::MissingRedeliveryPolicy { ref reference, .. } if reference == "slow"));
}

#[rstest]
fn reference_and_overrides_conflict(types: Types) {
    let named = HashMap::from([("slow".to_owned(), RedeliveryPolicy::default())]);
    let err = policy("io", &types.io)
        .redelivery_ref("slow")
        .redelivery(RedeliveryOverrides::default().maximum_redeliveries(2))
        .build(&RedeliveryPolicy::default(), &named)
        .expect_err("conflict");
    assert_eq!(err, ConfigError::ConflictingRedeliveryPolicy("io".into()));
}

#[rstest]
fn reference_resolves_named_policy(types: Types) {
    let named = HashMap::from([(
        "slow".to_owned(),
        RedeliveryPolicy::default().maximum_redeliveries(7),
    )]);
    let p = policy("io", &types.io)
        .redelivery_ref("slow")
        .build(&RedeliveryPolicy::default(), &named)
        .expect("valid policy");
    assert_eq!(p.redelivery().maximum_redeliveries, 7);
    assert_eq!(p.redelivery_ref(), Some("slow"));
}

#[test]
fn policies_must_claim_a_type() {
    let err = ExceptionPolicy::builder("empty")
        .build(&RedeliveryPolicy::default(), &HashMap::new())
        .expect_err("no types");
    assert_eq!(err, ConfigError::NoExceptionTypes("empty".into()));
}

#[rstest]
fn conditions_default_to_false_and_retry_to_true(types: Types) {
    let p = build(policy("io", &types.io));
    let ex = Exchange::new("x");
    assert!(!p.is_handled(&ex));
    assert!(!p.is_continued(&ex));
    assert!(p.should_retry(&ex));
}
