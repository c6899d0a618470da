// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Core types for prompt admission

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Deployment context a submission arrives from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// SFW-only: profanity and NSFW terms are blocked, blocks never escalate
    Strict,
    /// Disallowed-content rules only, blocks escalate towards a mute
    #[default]
    Standard,
}

impl Domain {
    pub fn is_strict(&self) -> bool {
        matches!(self, Domain::Strict)
    }
}

/// A prompt presented for audit before generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub user_id: String,
    /// Display name, carried onto restriction rows for the review queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub moderator_exempt: bool,
}

impl Submission {
    pub fn new(user_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            user_id: user_id.into(),
            username: None,
            domain: Domain::Standard,
            moderator_exempt: false,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    pub fn exempt(mut self) -> Self {
        self.moderator_exempt = true;
        self
    }
}

/// Which stage of the pipeline produced a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockSource {
    LocalPattern,
    ExternalService,
}

impl BlockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSource::LocalPattern => "local-pattern",
            BlockSource::ExternalService => "external-service",
        }
    }
}

impl fmt::Display for BlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule hit: the matched trigger text and the category it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternMatch {
    pub trigger: String,
    pub category: String,
}

impl PatternMatch {
    pub fn new(trigger: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            category: category.into(),
        }
    }
}

/// Result of auditing one submission.
///
/// `blocked` implies a non-empty `reasons`; build values through the
/// constructors to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub blocked: bool,
    pub reasons: Vec<String>,
    pub source: BlockSource,
    #[serde(default)]
    pub matches: Vec<PatternMatch>,
}

impl AuditOutcome {
    pub fn allowed(source: BlockSource) -> Self {
        Self {
            blocked: false,
            reasons: Vec::new(),
            source,
            matches: Vec::new(),
        }
    }

    /// Build a local-pattern outcome from rule hits. Reasons are the distinct
    /// categories in first-hit order.
    pub fn from_matches(matches: Vec<PatternMatch>) -> Self {
        let mut reasons: Vec<String> = Vec::new();
        for m in &matches {
            if !reasons.contains(&m.category) {
                reasons.push(m.category.clone());
            }
        }
        Self {
            blocked: !reasons.is_empty(),
            reasons,
            source: BlockSource::LocalPattern,
            matches,
        }
    }

    /// Build an external-service outcome from flagged category labels
    pub fn from_categories(categories: Vec<String>) -> Self {
        let mut reasons: Vec<String> = Vec::new();
        for c in categories {
            if !c.trim().is_empty() && !reasons.contains(&c) {
                reasons.push(c);
            }
        }
        Self {
            blocked: !reasons.is_empty(),
            reasons,
            source: BlockSource::ExternalService,
            matches: Vec::new(),
        }
    }
}

/// Errors raised by the admission side outside of policy decisions
#[derive(Debug, Error)]
pub enum SafetyError {
    /// A rule term could not be compiled into a matcher
    #[error("Invalid pattern rule for {category}: {message}")]
    InvalidRule { category: String, message: String },

    /// Transport failure talking to the moderation service
    #[error("Moderation service request failed: {0}")]
    Transport(String),

    /// Moderation service call exceeded its timeout
    #[error("Moderation service timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Non-2xx reply from the moderation service
    #[error("Moderation service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Reply body did not match the expected shape
    #[error("Malformed moderation response: {0}")]
    MalformedResponse(String),

    /// Allowlist backing store failure
    #[error("Allowlist store error: {0}")]
    AllowlistStore(String),
}
