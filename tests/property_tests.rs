//! Property-based tests for invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Transition detection only looks at the two newest signals
//! - Sensitive configuration values never survive masking
//! - Numeric coercion accepts every spelling of the same integer
//! - Schedule normalisation

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use serde_json::{Value, json};
use vigil::alarm::{ConfigMap, MASK, Trigger, mask_config};
use vigil::sentinel::config::{as_int, as_scalar_string};
use vigil::signal::{Signal, Status, has_changed_status};
use vigil::util::parse_duration;

fn status() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Healthy),
        Just(Status::Unhealthy),
        Just(Status::Unknown),
    ]
}

fn history(statuses: &[Status]) -> Vec<Signal> {
    let now = Utc::now();
    statuses
        .iter()
        .enumerate()
        .map(|(age, status)| {
            Signal::new("alarm", *status, "msg").at(now - chrono::Duration::seconds(age as i64))
        })
        .collect()
}

// Property: a transition is decided by the newest two signals only
proptest! {
    #[test]
    fn prop_transition_uses_two_newest(statuses in prop::collection::vec(status(), 0..10)) {
        let expected = match statuses.as_slice() {
            [] => false,
            [_] => true,
            [newest, previous, ..] => newest != previous,
        };

        prop_assert_eq!(has_changed_status(&history(&statuses)), expected);
    }
}

// Property: older history never changes the outcome
proptest! {
    #[test]
    fn prop_older_history_is_ignored(
        newest in status(),
        previous in status(),
        older in prop::collection::vec(status(), 0..10),
    ) {
        let mut statuses = vec![newest, previous];
        let short = has_changed_status(&history(&statuses));

        statuses.extend(older);
        prop_assert_eq!(has_changed_status(&history(&statuses)), short);
    }
}

// Property: any key containing a sensitive word is masked, at any depth
proptest! {
    #[test]
    fn prop_sensitive_keys_are_masked(
        prefix in "[a-z_]{0,6}",
        word in prop_oneof![Just("password"), Just("secret"), Just("token"), Just("key")],
        value in "[ -~]{1,20}",
    ) {
        let key = format!("{prefix}{word}");
        let config: ConfigMap = serde_json::from_value(json!({
            key.clone(): value.clone(),
            "nested": { key.clone(): value.clone() },
            "list": [{ key.clone(): value }],
        }))
        .unwrap();

        let masked = mask_config(&config);

        prop_assert_eq!(&masked[&key], &Value::String(MASK.to_string()));
        prop_assert_eq!(&masked["nested"][&key], &Value::String(MASK.to_string()));
        prop_assert_eq!(&masked["list"][0][&key], &Value::String(MASK.to_string()));
    }
}

// Property: keys without a sensitive word pass through unchanged
proptest! {
    #[test]
    fn prop_plain_keys_untouched(key in "(host|port|url|query|region)", value in any::<i32>()) {
        let config: ConfigMap = serde_json::from_value(json!({ key.clone(): value })).unwrap();
        prop_assert_eq!(mask_config(&config), config);
    }
}

// Property: 200, 200.0 and "200" coerce to the same integer
proptest! {
    #[test]
    fn prop_int_coercion_agrees(n in -(1i64 << 52)..(1i64 << 52)) {
        prop_assert_eq!(as_int(&json!(n)), Some(n));
        prop_assert_eq!(as_int(&json!(n as f64)), Some(n));
        prop_assert_eq!(as_int(&json!(n.to_string())), Some(n));
        prop_assert_eq!(as_scalar_string(&json!(n as f64)), Some(n.to_string()));
    }
}

// Property: fractional numbers are never truncated into integers
proptest! {
    #[test]
    fn prop_fractions_rejected(n in -1_000_000i64..1_000_000, frac in 0.1f64..0.9) {
        prop_assert_eq!(as_int(&json!(n as f64 + frac)), None);
    }
}

// Property: 5-field cron expressions gain a leading seconds field
proptest! {
    #[test]
    fn prop_five_field_cron_gets_seconds(minute in 0u32..60, hour in 0u32..24) {
        let trigger = Trigger::cron(&format!("{minute} {hour} * * *")).unwrap();
        prop_assert_eq!(trigger, Trigger::Cron(format!("0 {minute} {hour} * * *")));
    }
}

// Property: compound durations add up
proptest! {
    #[test]
    fn prop_compound_duration_sums(h in 0u64..48, m in 0u64..60, s in 1u64..60) {
        let parsed = parse_duration(&format!("{h}h{m}m{s}s")).unwrap();
        prop_assert_eq!(parsed, Duration::from_secs(h * 3600 + m * 60 + s));
    }
}
