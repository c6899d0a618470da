// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Admission decision for one submission
//!
//! Pipeline:
//! 1. Local pattern rules, minus allowlisted hits (fail closed)
//! 2. External moderation service, only if (1) admitted (fail open)
//! 3. On a standard-domain block: count the violation, escalate, maybe mute

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::allowlist::AllowlistCache;
use super::external::ExternalClassifier;
use super::patterns::PatternAuditor;
use super::types::{AuditOutcome, BlockSource, SafetyError, Submission};
use crate::enforcement::counter::{CounterError, ViolationCounter};
use crate::enforcement::escalation::{EscalationPolicy, EscalationTier};
use crate::enforcement::workflow::Enforcer;
use crate::monitoring::GuardMetrics;

/// A denied submission, with the message to show the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyViolation {
    pub reasons: Vec<String>,
    pub source: BlockSource,
    pub message: String,
    /// Escalation tier reached; `None` when the block does not escalate
    pub tier: Option<EscalationTier>,
    pub muted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restriction_id: Option<Uuid>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("{}", .0.message)]
    PolicyViolation(PolicyViolation),

    /// Escalation could not be evaluated; the submission is not admitted
    #[error("Violation count unavailable: {0}")]
    CounterRead(#[source] CounterError),
}

impl AuditError {
    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            AuditError::PolicyViolation(v) => Some(v),
            AuditError::CounterRead(_) => None,
        }
    }
}

pub struct AuditOrchestrator {
    patterns: PatternAuditor,
    external: Arc<dyn ExternalClassifier>,
    external_budget: Duration,
    allowlist: Arc<AllowlistCache>,
    counter: Arc<ViolationCounter>,
    policy: EscalationPolicy,
    enforcer: Enforcer,
    metrics: Option<Arc<GuardMetrics>>,
}

impl AuditOrchestrator {
    pub fn new(
        patterns: PatternAuditor,
        external: Arc<dyn ExternalClassifier>,
        allowlist: Arc<AllowlistCache>,
        counter: Arc<ViolationCounter>,
        policy: EscalationPolicy,
        enforcer: Enforcer,
    ) -> Self {
        Self {
            patterns,
            external,
            external_budget: Duration::from_secs(3),
            allowlist,
            counter,
            policy,
            enforcer,
            metrics: None,
        }
    }

    /// Upper bound on the external classifier call, on top of the client's
    /// own request timeout
    pub fn with_external_budget(mut self, budget: Duration) -> Self {
        self.external_budget = budget;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<GuardMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn patterns(&self) -> &PatternAuditor {
        &self.patterns
    }

    /// Run the classification stages without counting or enforcement
    pub async fn evaluate(&self, submission: &Submission) -> AuditOutcome {
        if submission.prompt.trim().is_empty() {
            return AuditOutcome::allowed(BlockSource::LocalPattern);
        }

        let local = self.patterns.audit(
            &submission.prompt,
            submission.negative_prompt.as_deref(),
            submission.domain.is_strict(),
        );
        let local = self.allowlist.filter(local).await;
        if local.blocked {
            return local;
        }

        self.classify_external(submission).await
    }

    async fn classify_external(&self, submission: &Submission) -> AuditOutcome {
        let call = self.external.classify(&submission.prompt);
        let result = match tokio::time::timeout(self.external_budget, call).await {
            Ok(result) => result,
            Err(_) => Err(SafetyError::Timeout {
                timeout_ms: self.external_budget.as_millis() as u64,
            }),
        };

        match result {
            Ok(classification) if classification.flagged => {
                AuditOutcome::from_categories(classification.categories)
            }
            Ok(_) => AuditOutcome::allowed(BlockSource::ExternalService),
            Err(e) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.external_failures.inc();
                }
                warn!(
                    user_id = %submission.user_id,
                    classifier = self.external.name(),
                    "Moderation service unavailable, admitting on local rules only: {}",
                    e
                );
                AuditOutcome::allowed(BlockSource::ExternalService)
            }
        }
    }

    fn record_outcome(&self, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.audits.with_label_values(&[outcome]).inc();
        }
    }

    /// Admit or deny a submission.
    ///
    /// Standard-domain denials are counted and may mute the account before
    /// the violation is returned. Strict-domain and moderator-exempt denials
    /// never touch the counter.
    pub async fn audit(&self, submission: &Submission) -> Result<(), AuditError> {
        let outcome = self.evaluate(submission).await;
        self.enforce(submission, outcome).await
    }

    /// Admit or deny a submission given an outcome already produced by
    /// [`evaluate`](Self::evaluate) for it. Lets a caller inspect the outcome
    /// without classifying the prompt a second time.
    pub async fn enforce(
        &self,
        submission: &Submission,
        outcome: AuditOutcome,
    ) -> Result<(), AuditError> {
        if !outcome.blocked {
            self.record_outcome("admitted");
            debug!(user_id = %submission.user_id, "Prompt admitted");
            return Ok(());
        }

        if let Some(ref metrics) = self.metrics {
            metrics.blocks.with_label_values(&[outcome.source.as_str()]).inc();
        }
        info!(
            user_id = %submission.user_id,
            reasons = ?outcome.reasons,
            source = %outcome.source,
            strict = submission.domain.is_strict(),
            "Prompt blocked"
        );

        if submission.domain.is_strict() {
            self.record_outcome("blocked");
            let message = self.policy.strict_message(&outcome.reasons);
            return Err(AuditError::PolicyViolation(PolicyViolation {
                reasons: outcome.reasons,
                source: outcome.source,
                message,
                tier: None,
                muted: false,
                restriction_id: None,
            }));
        }

        if submission.moderator_exempt {
            self.record_outcome("blocked");
            let message = self.policy.evaluate(0, &outcome.reasons).user_message;
            return Err(AuditError::PolicyViolation(PolicyViolation {
                reasons: outcome.reasons,
                source: outcome.source,
                message,
                tier: None,
                muted: false,
                restriction_id: None,
            }));
        }

        let count = match self
            .counter
            .increment(&submission.user_id, outcome.source, &outcome.reasons)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.record_outcome("error");
                error!(
                    user_id = %submission.user_id,
                    reasons = ?outcome.reasons,
                    source = %outcome.source,
                    "Cannot evaluate escalation, denying submission: {}",
                    e
                );
                return Err(AuditError::CounterRead(e));
            }
        };

        let decision = self.policy.evaluate(count, &outcome.reasons);
        let mut restriction_id = None;
        let mut muted = false;

        if decision.mute_now {
            match self
                .enforcer
                .mute(
                    &submission.user_id,
                    submission.username.clone(),
                    outcome.reasons.clone(),
                )
                .await
            {
                Ok(applied) => {
                    if let Some(ref metrics) = self.metrics {
                        metrics.mutes.inc();
                    }
                    if let Some(e) = applied.session_error {
                        if let Some(ref metrics) = self.metrics {
                            metrics.enforcement_failures.inc();
                        }
                        error!(
                            user_id = %submission.user_id,
                            restriction_id = %applied.restriction.restriction().id,
                            "Account muted but sessions were not invalidated: {}",
                            e
                        );
                    }
                    restriction_id = Some(applied.restriction.restriction().id);
                    muted = true;
                }
                Err(e) => {
                    if let Some(ref metrics) = self.metrics {
                        metrics.enforcement_failures.inc();
                    }
                    error!(
                        user_id = %submission.user_id,
                        reasons = ?outcome.reasons,
                        count,
                        "Automated mute failed: {}",
                        e
                    );
                }
            }
        }

        self.record_outcome("blocked");
        Err(AuditError::PolicyViolation(PolicyViolation {
            reasons: outcome.reasons,
            source: outcome.source,
            message: decision.user_message,
            tier: Some(decision.tier),
            muted,
            restriction_id,
        }))
    }
}
