// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wires the admission pipeline and review workflow from configuration
//!
//! The orchestrator and the workflow share one violation counter and one
//! allowlist cache, so a moderator write is visible to the next audit in the
//! same process.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::GuardConfig;
use crate::enforcement::counter::{InMemoryEventStore, ViolationCounter, ViolationEventStore};
use crate::enforcement::escalation::EscalationPolicy;
use crate::enforcement::ports::{
    AccountStore, InMemoryAccountStore, InMemoryNotifier, InMemorySessionService,
    NotificationDispatcher, SessionService,
};
use crate::enforcement::restriction::{InMemoryRestrictionStore, RestrictionStore};
use crate::enforcement::workflow::{EnforcementPorts, Enforcer, RestrictionWorkflow};
use crate::monitoring::GuardMetrics;
use crate::safety::allowlist::{AllowlistCache, AllowlistStore, InMemoryAllowlistStore};
use crate::safety::auditor::AuditOrchestrator;
use crate::safety::external::{DisabledClassifier, ExternalClassifier, HttpModerationClient};
use crate::safety::patterns::PatternAuditor;
use crate::safety::types::SafetyError;

#[derive(Debug, Error)]
pub enum GuardBuildError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Storage and collaborator implementations
#[derive(Clone)]
pub struct GuardPorts {
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionService>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub restrictions: Arc<dyn RestrictionStore>,
    pub events: Arc<dyn ViolationEventStore>,
    pub allowlist: Arc<dyn AllowlistStore>,
}

impl GuardPorts {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        Self {
            accounts: Arc::new(InMemoryAccountStore::new()),
            sessions: Arc::new(InMemorySessionService::new()),
            notifier: Arc::new(InMemoryNotifier::new()),
            restrictions: Arc::new(InMemoryRestrictionStore::new()),
            events: Arc::new(InMemoryEventStore::new()),
            allowlist: Arc::new(InMemoryAllowlistStore::new()),
        }
    }

    fn enforcement(&self) -> EnforcementPorts {
        EnforcementPorts {
            accounts: self.accounts.clone(),
            sessions: self.sessions.clone(),
            notifier: self.notifier.clone(),
            restrictions: self.restrictions.clone(),
        }
    }
}

pub struct ContentGuard {
    pub auditor: AuditOrchestrator,
    pub workflow: RestrictionWorkflow,
    pub counter: Arc<ViolationCounter>,
    pub allowlist: Arc<AllowlistCache>,
    pub metrics: Arc<GuardMetrics>,
}

/// Build the classifier the configuration asks for
pub fn classifier_from_config(
    config: &GuardConfig,
) -> Result<Arc<dyn ExternalClassifier>, SafetyError> {
    match config.moderation.endpoint {
        Some(ref endpoint) => {
            let client = HttpModerationClient::new(
                endpoint,
                config.moderation.api_key.clone(),
                &config.moderation.policy,
                config.moderation.timeout_ms,
            )?
            .with_min_score(config.moderation.min_score);
            Ok(Arc::new(client))
        }
        None => {
            info!("No moderation service configured, local rules only");
            Ok(Arc::new(DisabledClassifier))
        }
    }
}

impl ContentGuard {
    pub fn from_config(config: &GuardConfig, ports: GuardPorts) -> Result<Self, GuardBuildError> {
        let classifier = classifier_from_config(config)?;
        Self::with_classifier(config, ports, classifier)
    }

    pub fn with_classifier(
        config: &GuardConfig,
        ports: GuardPorts,
        classifier: Arc<dyn ExternalClassifier>,
    ) -> Result<Self, GuardBuildError> {
        config.validate().map_err(GuardBuildError::Config)?;

        let metrics = Arc::new(GuardMetrics::new()?);
        let policy = EscalationPolicy::new(config.thresholds).map_err(GuardBuildError::Config)?;
        let patterns = PatternAuditor::new(&config.custom_blocked_terms)?;

        let counter = Arc::new(
            ViolationCounter::with_window(ports.events.clone(), config.window())
                .with_metrics(metrics.clone()),
        );
        let allowlist = Arc::new(AllowlistCache::new(
            ports.allowlist.clone(),
            config.allowlist_ttl(),
        ));

        let auditor = AuditOrchestrator::new(
            patterns,
            classifier,
            allowlist.clone(),
            counter.clone(),
            policy,
            Enforcer::new(ports.enforcement()),
        )
        .with_external_budget(config.moderation_timeout())
        .with_metrics(metrics.clone());

        let workflow = RestrictionWorkflow::new(ports.enforcement(), counter.clone(), allowlist.clone())
            .with_metrics(metrics.clone());

        Ok(Self {
            auditor,
            workflow,
            counter,
            allowlist,
            metrics,
        })
    }
}
