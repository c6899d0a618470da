// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Escalation tier ordering and threshold configuration

use fabstir_content_guard::{EscalationPolicy, EscalationThresholds, EscalationTier};

fn reasons() -> Vec<String> {
    vec!["bestiality".to_string()]
}

#[test]
fn test_tier_never_decreases_as_count_grows() {
    let threshold_sets = [
        EscalationThresholds::default(),
        EscalationThresholds { warned: 0, notified: 1, muted: 2 },
        EscalationThresholds { warned: 10, notified: 50, muted: 100 },
    ];
    for thresholds in threshold_sets {
        let policy = EscalationPolicy::new(thresholds).unwrap();
        let mut previous = EscalationTier::Blocked;
        for count in 0..=150 {
            let tier = policy.tier(count);
            assert!(tier >= previous, "tier dropped at count {} for {:?}", count, thresholds);
            previous = tier;
        }
        assert_eq!(previous, EscalationTier::Muted);
    }
}

#[test]
fn test_only_muted_tier_mutes() {
    let policy = EscalationPolicy::default();
    for count in 0..=20 {
        let decision = policy.evaluate(count, &reasons());
        assert_eq!(decision.mute_now, decision.tier == EscalationTier::Muted);
        assert!(decision
            .user_message
            .starts_with("Your prompt was blocked for: bestiality."));
    }
}

#[test]
fn test_custom_thresholds_boundaries() {
    let policy = EscalationPolicy::new(EscalationThresholds {
        warned: 1,
        notified: 2,
        muted: 4,
    })
    .unwrap();
    assert_eq!(policy.tier(1), EscalationTier::Blocked);
    assert_eq!(policy.tier(2), EscalationTier::Warned);
    assert_eq!(policy.tier(3), EscalationTier::Notified);
    assert_eq!(policy.tier(4), EscalationTier::Notified);
    assert_eq!(policy.tier(5), EscalationTier::Muted);
}

#[test]
fn test_invalid_threshold_orders_rejected() {
    for (warned, notified, muted) in [(3, 3, 8), (3, 8, 5), (9, 5, 8)] {
        let result = EscalationPolicy::new(EscalationThresholds { warned, notified, muted });
        let err = result.unwrap_err();
        assert!(err.contains("strictly ascending"));
    }
}

#[test]
fn test_partial_thresholds_fill_defaults() {
    let thresholds: EscalationThresholds = serde_json::from_str(r#"{"muted": 20}"#).unwrap();
    assert_eq!(thresholds.warned, 3);
    assert_eq!(thresholds.notified, 5);
    assert_eq!(thresholds.muted, 20);
    assert!(thresholds.validate().is_ok());
}

#[test]
fn test_tier_serializes_snake_case() {
    assert_eq!(serde_json::to_value(EscalationTier::Muted).unwrap(), "muted");
    assert!(EscalationTier::Warned < EscalationTier::Notified);
}
