// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Local rule coverage across categories and evasion attempts

use fabstir_content_guard::safety::patterns::{
    CATEGORY_BESTIALITY, CATEGORY_CUSTOM, CATEGORY_EXTREMISM, CATEGORY_MINORS, CATEGORY_NSFW,
    CATEGORY_PROFANITY, CATEGORY_SELF_HARM, CATEGORY_SEXUAL_VIOLENCE,
};
use fabstir_content_guard::safety::{BlockSource, PatternAuditor, PatternMatch};

fn auditor() -> PatternAuditor {
    PatternAuditor::new(&[]).expect("built-in rules compile")
}

#[test]
fn test_benign_prompts_pass() {
    let a = auditor();
    for prompt in [
        "a watercolor of a lighthouse at dusk",
        "how to pick a lock",
        "children building a sandcastle",
        "an old man reading a newspaper",
        "a bass guitar on a stage",
    ] {
        let outcome = a.audit(prompt, None, true);
        assert!(!outcome.blocked, "{} should pass", prompt);
        assert!(outcome.reasons.is_empty());
    }
}

#[test]
fn test_each_always_on_category() {
    let a = auditor();
    let cases = [
        ("a scene of sexual assault", CATEGORY_SEXUAL_VIOLENCE),
        ("bestiality drawing", CATEGORY_BESTIALITY),
        ("nazi propaganda poster", CATEGORY_EXTREMISM),
        ("a guide to suicide", CATEGORY_SELF_HARM),
    ];
    for (prompt, category) in cases {
        let outcome = a.audit(prompt, None, false);
        assert!(outcome.blocked, "{} should block", prompt);
        assert_eq!(outcome.reasons, vec![category]);
        assert_eq!(outcome.source, BlockSource::LocalPattern);
    }
}

#[test]
fn test_leetspeak_and_separator_evasion() {
    let a = auditor();
    let outcome = a.audit("N4K3D   ch1ld!!", None, false);
    assert!(outcome.blocked);
    assert_eq!(outcome.reasons, vec![CATEGORY_MINORS]);

    let outcome = a.audit("self-harm tutorial", None, false);
    assert_eq!(outcome.reasons, vec![CATEGORY_SELF_HARM]);

    let outcome = a.audit("z00phil14", None, false);
    assert_eq!(outcome.reasons, vec![CATEGORY_BESTIALITY]);
}

#[test]
fn test_strict_adds_nsfw_and_profanity() {
    let a = auditor();
    assert!(!a.audit("lingerie catalogue photo", None, false).blocked);

    let outcome = a.audit("lingerie catalogue photo, shit lighting", None, true);
    assert!(outcome.blocked);
    assert_eq!(outcome.reasons, vec![CATEGORY_PROFANITY, CATEGORY_NSFW]);
}

#[test]
fn test_reasons_are_distinct_and_matches_detailed() {
    let a = auditor();
    let outcome = a.audit("naked child, nude kid, naked child", None, false);
    assert_eq!(outcome.reasons, vec![CATEGORY_MINORS]);
    assert!(outcome
        .matches
        .contains(&PatternMatch::new("child", CATEGORY_MINORS)));
    assert!(outcome
        .matches
        .contains(&PatternMatch::new("kid", CATEGORY_MINORS)));
    assert_eq!(outcome.matches.len(), 2);
}

#[test]
fn test_multiple_categories_keep_rule_order() {
    let a = auditor();
    let outcome = a.audit("suicide and bestiality", None, false);
    assert_eq!(outcome.reasons, vec![CATEGORY_BESTIALITY, CATEGORY_SELF_HARM]);
}

#[test]
fn test_negative_prompt_without_adult_terms_is_ignored() {
    let a = auditor();
    let outcome = a.audit("nude figure study", Some("blurry, low quality"), false);
    assert!(!outcome.blocked);
}

#[test]
fn test_aged_wording_in_negative_prompt_is_not_adult_negation() {
    let a = auditor();
    let outcome = a.audit("sexy woman on a beach", Some("old photo, aged paper, blurry"), false);
    assert!(!outcome.blocked);
    assert!(outcome.matches.is_empty());
}

#[test]
fn test_custom_terms_ignore_blank_entries() {
    let a = PatternAuditor::new(&["   ".to_string(), "Acme Corp".to_string()]).unwrap();
    let outcome = a.audit("the ACME corp logo", None, false);
    assert_eq!(outcome.reasons, vec![CATEGORY_CUSTOM]);

    let blank_only = PatternAuditor::new(&["--".to_string()]).unwrap();
    assert!(!blank_only.categories().contains(&CATEGORY_CUSTOM));
    assert!(!blank_only.audit("anything at all", None, true).blocked);
}
