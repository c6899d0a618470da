// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Automated mute enforcement and the moderator review workflow

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::counter::{CounterError, ViolationCounter};
use super::ports::{AccountStore, NotificationDispatcher, PortError, SessionService};
use super::restriction::{
    Decision, InsertOutcome, Page, Resolution, Restriction, RestrictionError, RestrictionFilter,
    RestrictionPage, RestrictionStore, StatusKind,
};
use crate::monitoring::GuardMetrics;
use crate::safety::allowlist::{AllowlistCache, AllowlistEntry};
use crate::safety::types::SafetyError;

pub const NOTIFICATION_KIND: &str = "restriction-resolved";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Restriction {0} not found")]
    RestrictionNotFound(Uuid),

    #[error("Restriction {id} already resolved as {status}")]
    RestrictionAlreadyResolved { id: Uuid, status: StatusKind },

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error(transparent)]
    Allowlist(#[from] SafetyError),
}

impl From<RestrictionError> for WorkflowError {
    fn from(e: RestrictionError) -> Self {
        match e {
            RestrictionError::NotFound(id) => WorkflowError::RestrictionNotFound(id),
            RestrictionError::AlreadyResolved { id, status } => {
                WorkflowError::RestrictionAlreadyResolved { id, status }
            }
            RestrictionError::Store(e) => WorkflowError::Port(e),
        }
    }
}

/// Idempotency key for the outcome notification of a restriction
pub fn notification_key(restriction_id: Uuid, decision: Decision) -> String {
    let mut hasher = Sha256::new();
    hasher.update(restriction_id.as_bytes());
    hasher.update(decision.as_str().as_bytes());
    format!("restriction-{}", hex::encode(hasher.finalize()))
}

/// Collaborators shared by enforcement and review
#[derive(Clone)]
pub struct EnforcementPorts {
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionService>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub restrictions: Arc<dyn RestrictionStore>,
}

/// Result of an automated mute that reached the account
#[derive(Debug)]
pub struct MuteOutcome {
    pub restriction: InsertOutcome,
    /// The mute is stored but ending the user's sessions failed
    pub session_error: Option<WorkflowError>,
}

/// Applies an automated mute
pub struct Enforcer {
    ports: EnforcementPorts,
}

impl Enforcer {
    pub fn new(ports: EnforcementPorts) -> Self {
        Self { ports }
    }

    /// Open a pending restriction, then mute the account and end its sessions.
    ///
    /// The row is written first, so a muted account always has a review
    /// pending. An error means the account was not muted; the row may exist
    /// and the next block retries the mute against it. A user with a pending
    /// restriction is muted again but keeps the existing row.
    pub async fn mute(
        &self,
        user_id: &str,
        username: Option<String>,
        triggers: Vec<String>,
    ) -> Result<MuteOutcome, WorkflowError> {
        let outcome = self
            .ports
            .restrictions
            .insert_if_no_pending(Restriction::pending(user_id, username, triggers))
            .await?;

        if let Err(e) = self.ports.accounts.set_muted(user_id, true).await {
            warn!(
                user_id,
                restriction_id = %outcome.restriction().id,
                "Restriction opened but account mute failed: {}",
                e
            );
            return Err(e.into());
        }

        let session_error = self
            .ports
            .sessions
            .invalidate_sessions(user_id)
            .await
            .err()
            .map(WorkflowError::from);

        match outcome {
            InsertOutcome::Created(ref r) => info!(
                user_id,
                restriction_id = %r.id,
                triggers = ?r.triggers,
                "Account muted, restriction opened for review"
            ),
            InsertOutcome::Existing(ref r) => info!(
                user_id,
                restriction_id = %r.id,
                "Account muted again, review already pending"
            ),
        }
        Ok(MuteOutcome {
            restriction: outcome,
            session_error,
        })
    }
}

/// Moderator operations on restrictions and the allowlist
pub struct RestrictionWorkflow {
    ports: EnforcementPorts,
    counter: Arc<ViolationCounter>,
    allowlist: Arc<AllowlistCache>,
    metrics: Option<Arc<GuardMetrics>>,
    /// Serializes resolutions so a retry never overlaps the first attempt
    resolving: Mutex<()>,
}

impl RestrictionWorkflow {
    pub fn new(
        ports: EnforcementPorts,
        counter: Arc<ViolationCounter>,
        allowlist: Arc<AllowlistCache>,
    ) -> Self {
        Self {
            ports,
            counter,
            allowlist,
            metrics: None,
            resolving: Mutex::new(()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GuardMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve a pending restriction and apply the account side effects.
    ///
    /// Fails without side effects when the restriction is missing or already
    /// resolved. If a side effect fails the error is returned and the
    /// restriction stays resolved with its effects unapplied; resolving it
    /// again with the same decision finishes the job. Notification failures
    /// are logged only.
    pub async fn resolve(
        &self,
        restriction_id: Uuid,
        decision: Decision,
        moderator_id: &str,
        message: &str,
    ) -> Result<Restriction, WorkflowError> {
        let _serial = self.resolving.lock().await;

        let resolution = Resolution {
            resolved_at: Utc::now(),
            resolved_by: moderator_id.to_string(),
            message: message.to_string(),
        };

        let mut restriction = match self
            .ports
            .restrictions
            .resolve(restriction_id, decision, resolution)
            .await
        {
            Ok(restriction) => restriction,
            Err(RestrictionError::AlreadyResolved { id, status }) => {
                let existing = self.get(id).await?;
                if existing.effects_applied || status != decision.status_kind() {
                    warn!(%restriction_id, moderator_id, %status, "Restriction already resolved");
                    return Err(WorkflowError::RestrictionAlreadyResolved { id, status });
                }
                info!(
                    %restriction_id,
                    moderator_id,
                    decision = decision.as_str(),
                    "Completing side effects of an earlier resolution"
                );
                existing
            }
            Err(e) => {
                warn!(%restriction_id, moderator_id, "Restriction resolve rejected: {}", e);
                return Err(e.into());
            }
        };

        let user_id = restriction.user_id.clone();
        let applied = match decision {
            Decision::Upheld => self.apply_upheld(&user_id).await,
            Decision::Overturned => self.apply_overturned(&user_id).await,
        };
        if let Err(e) = applied {
            error!(
                %restriction_id,
                user_id = %user_id,
                decision = decision.as_str(),
                "Restriction resolved but account update failed, retry to complete: {}",
                e
            );
            return Err(e);
        }

        self.ports
            .restrictions
            .mark_effects_applied(restriction_id)
            .await?;
        restriction.effects_applied = true;

        info!(
            %restriction_id,
            user_id = %user_id,
            moderator_id,
            decision = decision.as_str(),
            "Restriction resolved"
        );

        self.notify_outcome(&restriction, decision).await;
        Ok(restriction)
    }

    async fn apply_upheld(&self, user_id: &str) -> Result<(), WorkflowError> {
        self.ports.accounts.confirm_mute(user_id).await?;
        // The user may have signed in again since the automated mute
        self.ports.sessions.invalidate_sessions(user_id).await?;
        Ok(())
    }

    async fn apply_overturned(&self, user_id: &str) -> Result<(), WorkflowError> {
        self.ports.accounts.set_muted(user_id, false).await?;
        self.counter.reset(user_id).await?;
        self.ports.accounts.reset_violation_state(user_id).await?;
        self.ports.sessions.invalidate_sessions(user_id).await?;
        Ok(())
    }

    async fn notify_outcome(&self, restriction: &Restriction, decision: Decision) {
        let key = notification_key(restriction.id, decision);
        let resolution = restriction.status.resolution();
        let payload = serde_json::json!({
            "restrictionId": restriction.id,
            "outcome": decision.as_str(),
            "message": resolution.map(|r| r.message.as_str()).unwrap_or_default(),
            "resolvedAt": resolution.map(|r| r.resolved_at),
        });

        if let Err(e) = self
            .ports
            .notifier
            .notify(&restriction.user_id, NOTIFICATION_KIND, &key, payload)
            .await
        {
            if let Some(ref metrics) = self.metrics {
                metrics.notification_failures.inc();
            }
            error!(
                restriction_id = %restriction.id,
                user_id = %restriction.user_id,
                idempotency_key = %key,
                "Restriction outcome notification failed: {}",
                e
            );
        }
    }

    /// Add or update an exception and drop the cached allowlist
    pub async fn add_to_allowlist(
        &self,
        trigger: &str,
        category: &str,
        moderator_id: &str,
        reason: &str,
        restriction_id: Option<Uuid>,
    ) -> Result<AllowlistEntry, WorkflowError> {
        let entry = AllowlistEntry::new(trigger, category, moderator_id, reason, restriction_id);
        let stored = self.allowlist.store().upsert(entry).await?;
        self.allowlist.bust().await;
        info!(
            trigger = %stored.trigger,
            category = %stored.category,
            moderator_id,
            "Allowlist entry saved"
        );
        Ok(stored)
    }

    pub async fn remove_from_allowlist(
        &self,
        trigger: &str,
        category: &str,
    ) -> Result<bool, WorkflowError> {
        let removed = self.allowlist.store().remove(trigger, category).await?;
        if removed {
            self.allowlist.bust().await;
        }
        Ok(removed)
    }

    pub async fn list_allowlist(&self) -> Result<Vec<AllowlistEntry>, WorkflowError> {
        Ok(self.allowlist.store().list().await?)
    }

    pub async fn get(&self, restriction_id: Uuid) -> Result<Restriction, WorkflowError> {
        self.ports
            .restrictions
            .get(restriction_id)
            .await?
            .ok_or(WorkflowError::RestrictionNotFound(restriction_id))
    }

    /// Review queue query
    pub async fn list(
        &self,
        filter: &RestrictionFilter,
        page: Page,
    ) -> Result<RestrictionPage, WorkflowError> {
        Ok(self.ports.restrictions.list(filter, page).await?)
    }
}
