// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prompt admission: local rules, external classifier, allowlist and the
//! orchestrator that combines them

pub mod allowlist;
pub mod auditor;
pub mod external;
pub mod patterns;
pub mod types;

pub use allowlist::{AllowlistCache, AllowlistEntry, AllowlistStore, InMemoryAllowlistStore};
pub use auditor::{AuditError, AuditOrchestrator, PolicyViolation};
pub use external::{Classification, DisabledClassifier, ExternalClassifier, HttpModerationClient};
pub use patterns::PatternAuditor;
pub use types::{AuditOutcome, BlockSource, Domain, PatternMatch, SafetyError, Submission};
