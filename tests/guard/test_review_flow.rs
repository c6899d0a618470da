// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Moderator resolution of restrictions opened by automated mutes

use super::mock::{harness, harness_with, test_config, BrokenNotifier, Harness, Script};
use fabstir_content_guard::enforcement::restriction::{Page, RestrictionFilter, StatusKind};
use fabstir_content_guard::enforcement::workflow::{notification_key, NOTIFICATION_KIND};
use fabstir_content_guard::{AuditError, Decision, Submission, WorkflowError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use uuid::Uuid;

const BLOCKED_PROMPT: &str = "zoophilia artwork, oil painting";

/// Drive a user past the mute threshold and return the opened restriction
async fn mute_user(h: &Harness, user: &str) -> Uuid {
    let submission = Submission::new(user, BLOCKED_PROMPT).with_username(format!("{}-name", user));
    loop {
        match h.guard.auditor.audit(&submission).await {
            Err(AuditError::PolicyViolation(v)) if v.muted => {
                return v.restriction_id.expect("muted violation carries restriction");
            }
            Err(AuditError::PolicyViolation(_)) => continue,
            other => panic!("unexpected audit result {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_uphold_confirms_mute() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;
    assert_eq!(h.sessions.invalidation_count("u1").await, 1);

    let resolved = h
        .guard
        .workflow
        .resolve(id, Decision::Upheld, "mod-1", "repeated violations")
        .await
        .unwrap();

    assert_eq!(resolved.status.kind(), StatusKind::Upheld);
    let resolution = resolved.status.resolution().unwrap();
    assert_eq!(resolution.resolved_by, "mod-1");
    assert_eq!(resolution.message, "repeated violations");

    let state = h.accounts.state("u1").await;
    assert!(state.muted);
    assert!(state.mute_confirmed);
    assert_eq!(h.sessions.invalidation_count("u1").await, 2);
    // Count is untouched by an uphold
    assert_eq!(h.guard.counter.count("u1").await.unwrap(), 9);
}

#[tokio::test]
async fn test_overturn_clears_account_and_count() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    h.guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap();

    let state = h.accounts.state("u1").await;
    assert!(!state.muted);
    assert!(!state.mute_confirmed);
    assert_eq!(state.violation_resets, 1);
    assert_eq!(h.guard.counter.count("u1").await.unwrap(), 0);
    assert_eq!(h.sessions.invalidation_count("u1").await, 2);

    // The next block starts over from the lowest tier
    match h.guard.auditor.audit(&Submission::new("u1", BLOCKED_PROMPT)).await {
        Err(AuditError::PolicyViolation(v)) => assert!(!v.muted),
        other => panic!("expected violation, got {:?}", other),
    }
    assert_eq!(h.guard.counter.count("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_overturn_notifies_once_with_stable_key() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    h.guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap();

    let delivered = h.notifier.delivered().await;
    assert_eq!(delivered.len(), 1);
    let n = &delivered[0];
    assert_eq!(n.user_id, "u1");
    assert_eq!(n.kind, NOTIFICATION_KIND);
    assert_eq!(n.idempotency_key, notification_key(id, Decision::Overturned));
    assert_eq!(n.payload["outcome"], "overturned");
    assert_eq!(n.payload["message"], "false positive");
    assert_eq!(n.payload["restrictionId"], id.to_string());
}

#[tokio::test]
async fn test_second_resolve_rejected_without_side_effects() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    h.guard
        .workflow
        .resolve(id, Decision::Upheld, "mod-1", "confirmed")
        .await
        .unwrap();
    let before = h.accounts.state("u1").await;
    let sessions_before = h.sessions.invalidation_count("u1").await;

    let err = h
        .guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-2", "changed my mind")
        .await
        .unwrap_err();
    match err {
        WorkflowError::RestrictionAlreadyResolved { id: got, status } => {
            assert_eq!(got, id);
            assert_eq!(status, StatusKind::Upheld);
        }
        other => panic!("expected already resolved, got {:?}", other),
    }

    assert_eq!(h.accounts.state("u1").await, before);
    assert_eq!(h.sessions.invalidation_count("u1").await, sessions_before);
    assert_eq!(h.notifier.delivered().await.len(), 1);
    assert_eq!(
        h.guard.workflow.get(id).await.unwrap().status.kind(),
        StatusKind::Upheld
    );
}

#[tokio::test]
async fn test_concurrent_resolves_apply_once() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    let (a, b) = tokio::join!(
        h.guard.workflow.resolve(id, Decision::Overturned, "mod-1", "a"),
        h.guard.workflow.resolve(id, Decision::Overturned, "mod-2", "b"),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(h.accounts.state("u1").await.violation_resets, 1);
    assert_eq!(h.notifier.delivered().await.len(), 1);
}

#[tokio::test]
async fn test_failed_unmute_can_be_retried() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    h.accounts.fail_writes.store(true, Ordering::SeqCst);
    let err = h
        .guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Port(_)));

    let stored = h.guard.workflow.get(id).await.unwrap();
    assert_eq!(stored.status.kind(), StatusKind::Overturned);
    assert!(!stored.effects_applied);
    assert!(h.accounts.state("u1").await.muted);
    assert!(h.notifier.delivered().await.is_empty());

    // The opposite decision cannot take over a half-applied resolution
    let err = h
        .guard
        .workflow
        .resolve(id, Decision::Upheld, "mod-2", "confirmed")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::RestrictionAlreadyResolved {
            status: StatusKind::Overturned,
            ..
        }
    ));

    h.accounts.fail_writes.store(false, Ordering::SeqCst);
    let resolved = h
        .guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "retry")
        .await
        .unwrap();
    assert!(resolved.effects_applied);
    // The original resolution is kept
    assert_eq!(resolved.status.resolution().unwrap().message, "false positive");

    let state = h.accounts.state("u1").await;
    assert!(!state.muted);
    assert_eq!(state.violation_resets, 1);
    assert_eq!(h.guard.counter.count("u1").await.unwrap(), 0);

    let delivered = h.notifier.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload["message"], "false positive");

    let err = h
        .guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "again")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RestrictionAlreadyResolved { .. }));
    assert_eq!(h.notifier.delivered().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_restriction() {
    let h = harness(Script::Clean);
    let missing = Uuid::new_v4();
    let err = h
        .guard
        .workflow
        .resolve(missing, Decision::Upheld, "mod-1", "")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::RestrictionNotFound(id) if id == missing));
    assert!(matches!(
        h.guard.workflow.get(missing).await,
        Err(WorkflowError::RestrictionNotFound(_))
    ));
}

#[tokio::test]
async fn test_notification_failure_keeps_resolution() {
    let h = harness_with(test_config(), Script::Clean, Some(Arc::new(BrokenNotifier)));
    let id = mute_user(&h, "u1").await;

    let resolved = h
        .guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap();

    assert_eq!(resolved.status.kind(), StatusKind::Overturned);
    assert!(!h.accounts.state("u1").await.muted);
    assert_eq!(h.guard.metrics.notification_failures.get(), 1);
}

#[tokio::test]
async fn test_new_restriction_after_resolution() {
    let h = harness(Script::Clean);
    let first = mute_user(&h, "u1").await;
    h.guard
        .workflow
        .resolve(first, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap();

    let second = mute_user(&h, "u1").await;
    assert_ne!(first, second);

    let pending = h
        .guard
        .workflow
        .list(
            &RestrictionFilter {
                status: Some(StatusKind::Pending),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.items[0].id, second);

    let all = h
        .guard
        .workflow
        .list(&RestrictionFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(all.total, 2);
    assert_eq!(all.items[0].id, second, "newest first");
}

#[tokio::test]
async fn test_review_queue_filters_by_username() {
    let h = harness(Script::Clean);
    mute_user(&h, "alice").await;
    mute_user(&h, "bob").await;

    let page = h
        .guard
        .workflow
        .list(
            &RestrictionFilter {
                username: Some("ALI".to_string()),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].user_id, "alice");
}

#[tokio::test]
async fn test_allowlist_from_restriction_review() {
    let h = harness(Script::Clean);
    let id = mute_user(&h, "u1").await;

    let entry = h
        .guard
        .workflow
        .add_to_allowlist("Zoophilia", "bestiality", "mod-1", "documentary title", Some(id))
        .await
        .unwrap();
    assert_eq!(entry.restriction_id, Some(id));

    h.guard
        .workflow
        .resolve(id, Decision::Overturned, "mod-1", "false positive")
        .await
        .unwrap();
    assert!(h
        .guard
        .auditor
        .audit(&Submission::new("u1", BLOCKED_PROMPT))
        .await
        .is_ok());

    let entries = h.guard.workflow.list_allowlist().await.unwrap();
    assert_eq!(entries.len(), 1);

    assert!(h
        .guard
        .workflow
        .remove_from_allowlist("zoophilia", "bestiality")
        .await
        .unwrap());
    assert!(h
        .guard
        .auditor
        .audit(&Submission::new("u1", BLOCKED_PROMPT))
        .await
        .is_err());
}
