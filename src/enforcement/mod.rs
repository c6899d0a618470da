// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Violation counting, escalation, automated mutes and moderator review

pub mod counter;
pub mod escalation;
pub mod ports;
pub mod restriction;
pub mod workflow;

pub use counter::{CounterError, InMemoryEventStore, ViolationCounter, ViolationEvent, ViolationEventStore};
pub use escalation::{EscalationDecision, EscalationPolicy, EscalationThresholds, EscalationTier};
pub use ports::{
    AccountStore, InMemoryAccountStore, InMemoryNotifier, InMemorySessionService,
    NotificationDispatcher, PortError, SessionService,
};
pub use restriction::{
    Decision, InMemoryRestrictionStore, Page, Restriction, RestrictionFilter, RestrictionPage,
    RestrictionStatus, RestrictionStore, StatusKind,
};
pub use workflow::{EnforcementPorts, Enforcer, MuteOutcome, RestrictionWorkflow, WorkflowError};
