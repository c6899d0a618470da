// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod config;
pub mod enforcement;
pub mod guard;
pub mod monitoring;
pub mod safety;

pub use config::{GuardConfig, ModerationServiceConfig};
pub use enforcement::{
    Decision, EscalationPolicy, EscalationThresholds, EscalationTier, Restriction,
    RestrictionStatus, RestrictionWorkflow, ViolationCounter, WorkflowError,
};
pub use guard::{ContentGuard, GuardBuildError, GuardPorts};
pub use monitoring::GuardMetrics;
pub use safety::{
    AuditError, AuditOrchestrator, AuditOutcome, BlockSource, Domain, PolicyViolation,
    Submission,
};
