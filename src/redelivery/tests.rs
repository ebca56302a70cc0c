//! Tests for redelivery policies and delay computation.

use std::time::Duration;

use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};
use rstest::rstest;

use super::*;
use crate::error::ConfigError;

fn ms(n: u64) -> Duration { Duration::from_millis(n) }

#[test]
fn defaults_perform_no_redelivery() {
    let policy = RedeliveryPolicy::default();
    assert_eq!(policy.maximum_redeliveries, 0);
    assert_eq!(policy.redelivery_delay, DEFAULT_REDELIVERY_DELAY);
    assert!(policy.is_exhausted(0));
    assert!(policy.allow_redelivery_while_stopping);
    assert!(policy.validate().is_ok());
}

#[rstest]
#[case(-1, 0, false)]
#[case(-1, 1_000, false)]
#[case(0, 0, true)]
#[case(2, 1, false)]
#[case(2, 2, true)]
fn exhaustion_follows_budget(#[case] max: i32, #[case] attempts: u32, #[case] exhausted: bool) {
    let policy = RedeliveryPolicy::default().maximum_redeliveries(max);
    assert_eq!(policy.is_exhausted(attempts), exhausted);
}

#[rstest]
#[case(1, 100)]
#[case(2, 200)]
#[case(3, 400)]
#[case(4, 800)]
fn exponential_back_off_doubles(#[case] attempt: u32, #[case] expected: u64) {
    let policy = RedeliveryPolicy::default()
        .redelivery_delay(ms(100))
        .use_exponential_back_off(true);
    assert_eq!(policy.compute_delay(attempt), ms(expected));
}

#[test]
fn cap_clips_back_off() {
    let policy = RedeliveryPolicy::default()
        .redelivery_delay(ms(100))
        .maximum_redelivery_delay(ms(300))
        .use_exponential_back_off(true);
    assert_eq!(policy.compute_delay(3), ms(300));
    assert_eq!(policy.compute_delay(30), ms(300));
}

#[test]
fn zero_cap_is_uncapped() {
    let policy = RedeliveryPolicy::default()
        .maximum_redelivery_delay(Duration::ZERO)
        .redelivery_delay(ms(1_000))
        .use_exponential_back_off(true)
        .back_off_multiplier(10.0);
    assert_eq!(policy.compute_delay(4), ms(1_000_000));
}

#[test]
fn raising_delay_lifts_cap() {
    let policy = RedeliveryPolicy::default()
        .maximum_redelivery_delay(ms(500))
        .redelivery_delay(ms(2_000));
    assert_eq!(policy.maximum_redelivery_delay, ms(2_000));
    assert_eq!(policy.compute_delay(1), ms(2_000));
}

#[rstest]
#[case(1, 1_000)]
#[case(2, 1_000)]
#[case(3, 5_000)]
#[case(4, 5_000)]
#[case(5, 5_000)]
fn delay_pattern_steps(#[case] attempt: u32, #[case] expected: u64) {
    let pattern: DelayPattern = "0:1000;3:5000".parse().expect("valid pattern");
    let policy = RedeliveryPolicy::default().delay_pattern(pattern);
    assert_eq!(policy.compute_delay(attempt), ms(expected));
}

#[test]
fn pattern_below_first_threshold_waits_zero() {
    let pattern = DelayPattern::new([(5, ms(1_000)), (2, ms(10))]).expect("valid pattern");
    assert_eq!(pattern.steps()[0], (2, ms(10)));
    assert_eq!(pattern.delay_for(1), Duration::ZERO);
    assert_eq!(pattern.delay_for(4), ms(10));
}

#[rstest]
#[case("")]
#[case("1000")]
#[case("a:1000")]
#[case("1:-5")]
#[case("1:10;1:20")]
fn malformed_patterns_are_rejected(#[case] text: &str) {
    let err = text.parse::<DelayPattern>().expect_err("pattern must be rejected");
    assert!(matches!(err, ConfigError::InvalidDelayPattern { ref pattern, .. } if pattern == text));
}

#[test]
fn pattern_tolerates_whitespace_and_trailing_separator() {
    let pattern: DelayPattern = " 0 : 10 ; 2:20;".parse().expect("valid pattern");
    assert_eq!(pattern.to_string(), "0:10;2:20");
}

#[rstest]
#[case(0.0)]
#[case(1.0)]
#[case(-0.5)]
#[case(f64::NAN)]
fn invalid_collision_factor(#[case] factor: f64) {
    let policy = RedeliveryPolicy::default().collision_avoidance_factor(factor);
    assert!(matches!(
        policy.validate(),
        Err(ConfigError::InvalidCollisionAvoidanceFactor(_))
    ));
}

#[test]
fn invalid_multiplier() {
    let policy = RedeliveryPolicy::default().back_off_multiplier(0.5);
    assert_eq!(
        policy.validate(),
        Err(ConfigError::InvalidBackOffMultiplier(0.5))
    );
}

#[test]
fn collision_avoidance_percent_sets_factor() {
    let policy = RedeliveryPolicy::default().collision_avoidance_percent(20.0);
    assert!((policy.collision_avoidance_factor - 0.2).abs() < f64::EPSILON);
}

#[test]
fn attempt_logging_respects_interval() {
    let policy = RedeliveryPolicy::default().retry_attempted_log_interval(3);
    let logged: Vec<u32> = (1..=9).filter(|&n| policy.should_log_attempt(n)).collect();
    assert_eq!(logged, [3, 6, 9]);

    let silent = RedeliveryPolicy::default().retry_attempted_log_level(LoggingLevel::Off);
    assert!(!silent.should_log_attempt(1));
}

#[test]
fn overrides_derive_from_parent() {
    let parent = RedeliveryPolicy::default()
        .maximum_redeliveries(5)
        .use_collision_avoidance(true);
    let derived = RedeliveryOverrides::default()
        .maximum_redelivery_delay(ms(100))
        .redelivery_delay(ms(400))
        .async_delayed_redelivery(true)
        .apply(&parent);

    assert_eq!(derived.maximum_redeliveries, 5);
    assert!(derived.use_collision_avoidance);
    assert!(derived.async_delayed_redelivery);
    assert_eq!(derived.redelivery_delay, ms(400));
    assert_eq!(derived.maximum_redelivery_delay, ms(400));
}

#[test]
fn overrides_reach_retry_logging_knobs() {
    let derived = RedeliveryOverrides::default()
        .retry_attempted_log_interval(2)
        .log_retry_stack_trace(true)
        .apply(&RedeliveryPolicy::default());

    assert_eq!(derived.retry_attempted_log_interval, 2);
    assert!(derived.log_retry_stack_trace);
    assert!(!derived.should_log_attempt(1));
    assert!(derived.should_log_attempt(2));
}

#[test]
fn disable_redelivery_wins() {
    let derived = RedeliveryOverrides::default()
        .maximum_redeliveries(9)
        .disable_redelivery()
        .apply(&RedeliveryPolicy::default());
    assert_eq!(derived.maximum_redeliveries, 0);
    assert!(RedeliveryOverrides::default().is_empty());
}

#[test]
fn policy_deserialises_from_millis() {
    let json = r#"{
        "maximum_redeliveries": 3,
        "redelivery_delay": 250,
        "delay_pattern": "0:100;2:1000",
        "retries_exhausted_log_level": "warn"
    }"#;
    let policy: RedeliveryPolicy = serde_json::from_str(json).expect("valid policy json");
    assert_eq!(policy.maximum_redeliveries, 3);
    assert_eq!(policy.redelivery_delay, ms(250));
    assert_eq!(policy.maximum_redelivery_delay, DEFAULT_MAXIMUM_REDELIVERY_DELAY);
    assert_eq!(policy.retries_exhausted_log_level, LoggingLevel::Warn);
    assert_eq!(
        policy.delay_pattern.as_ref().map(DelayPattern::to_string).as_deref(),
        Some("0:100;2:1000")
    );

    let back = serde_json::to_value(&policy).expect("serialise policy");
    assert_eq!(back["redelivery_delay"], 250);
    assert_eq!(back["delay_pattern"], "0:100;2:1000");
}

#[test]
fn malformed_pattern_fails_deserialisation() {
    let json = r#"{ "delay_pattern": "nonsense" }"#;
    assert!(serde_json::from_str::<RedeliveryPolicy>(json).is_err());
}

proptest! {
    #[test]
    fn exponential_matches_closed_form(
        d in 1u64..5_000,
        m in 1u32..5,
        n in 1u32..8,
    ) {
        let policy = RedeliveryPolicy::default()
            .maximum_redelivery_delay(Duration::ZERO)
            .redelivery_delay(ms(d))
            .use_exponential_back_off(true)
            .back_off_multiplier(f64::from(m));
        let expected = d * u64::from(m).pow(n - 1);
        prop_assert_eq!(policy.compute_delay(n), ms(expected));
    }

    #[test]
    fn jitter_stays_within_band(
        d in 1u32..100_000,
        percent in 1u32..99,
        n in 1u32..10,
        seed in any::<u64>(),
    ) {
        let f = f64::from(percent) / 100.0;
        let policy = RedeliveryPolicy::default()
            .maximum_redelivery_delay(Duration::ZERO)
            .redelivery_delay(ms(u64::from(d)))
            .use_collision_avoidance(true)
            .collision_avoidance_factor(f);
        let mut rng = StdRng::seed_from_u64(seed);
        let delay = policy.compute_delay_with(n, &mut rng).as_millis();
        let delay = f64::from(u32::try_from(delay).expect("delay fits in u32"));
        let base = f64::from(d);
        let lo = (base * (1.0 - f / 2.0)).floor();
        let hi = (base * (1.0 + f / 2.0)).ceil();
        prop_assert!(delay >= lo && delay <= hi, "{delay} outside [{lo}, {hi}]");
    }

    #[test]
    fn delays_are_never_negative_and_respect_cap(
        d in 0u64..10_000,
        cap in 1u64..10_000,
        n in 0u32..64,
        jitter in any::<bool>(),
    ) {
        let policy = RedeliveryPolicy::default()
            .maximum_redelivery_delay(ms(cap))
            .redelivery_delay(ms(d))
            .use_exponential_back_off(true)
            .use_collision_avoidance(jitter);
        let delay = policy.compute_delay(n);
        let bound = policy.maximum_redelivery_delay.as_millis() * 2;
        prop_assert!(delay.as_millis() <= bound);
    }
}
