// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Violation count to enforcement tier mapping

use serde::{Deserialize, Serialize};

/// Ascending violation thresholds. A count above `muted` mutes the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    pub warned: u64,
    pub notified: u64,
    pub muted: u64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            warned: 3,
            notified: 5,
            muted: 8,
        }
    }
}

impl EscalationThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.warned < self.notified && self.notified < self.muted) {
            return Err(format!(
                "escalation thresholds must be strictly ascending, got warned={} notified={} muted={}",
                self.warned, self.notified, self.muted
            ));
        }
        Ok(())
    }
}

/// Severity tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    Blocked,
    Warned,
    Notified,
    Muted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub tier: EscalationTier,
    pub mute_now: bool,
    pub user_message: String,
}

#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    thresholds: EscalationThresholds,
}

fn blocked_for(reasons: &[String]) -> String {
    format!("Your prompt was blocked for: {}.", reasons.join(", "))
}

impl EscalationPolicy {
    pub fn new(thresholds: EscalationThresholds) -> Result<Self, String> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> EscalationThresholds {
        self.thresholds
    }

    pub fn tier(&self, count: u64) -> EscalationTier {
        let t = &self.thresholds;
        if count > t.muted {
            EscalationTier::Muted
        } else if count > t.notified {
            EscalationTier::Notified
        } else if count > t.warned {
            EscalationTier::Warned
        } else {
            EscalationTier::Blocked
        }
    }

    /// Decision for a standard-domain block, given the count including it
    pub fn evaluate(&self, count: u64, reasons: &[String]) -> EscalationDecision {
        let tier = self.tier(count);
        let base = blocked_for(reasons);
        let user_message = match tier {
            EscalationTier::Blocked => base,
            EscalationTier::Warned => format!(
                "{} Your account will be flagged for review if this continues.",
                base
            ),
            EscalationTier::Notified => {
                format!("{} Your account has been sent for review.", base)
            }
            EscalationTier::Muted => format!(
                "{} Your account has been muted pending moderator review.",
                base
            ),
        };
        EscalationDecision {
            tier,
            mute_now: tier == EscalationTier::Muted,
            user_message,
        }
    }

    /// Strict-domain message. Never escalates.
    pub fn strict_message(&self, reasons: &[String]) -> String {
        format!(
            "{} Only safe-for-work content is allowed here.",
            blocked_for(reasons)
        )
    }
}
