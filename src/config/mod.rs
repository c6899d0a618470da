// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Configuration for the content guard

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::enforcement::escalation::EscalationThresholds;

/// Longest accepted violation window: one year
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;

/// Moderation service settings. With no endpoint the external stage admits
/// everything and only local rules apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationServiceConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub policy: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Minimum category score reported as a flag
    pub min_score: f64,
}

impl Default for ModerationServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            policy: "image-prompt-v1".to_string(),
            timeout_ms: 3000,
            min_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub thresholds: EscalationThresholds,
    /// Rolling violation window in hours
    pub window_hours: i64,
    pub moderation: ModerationServiceConfig,
    /// Allowlist cache TTL in seconds
    pub allowlist_ttl_secs: u64,
    /// Extra always-blocked terms, reported under the `custom` category
    pub custom_blocked_terms: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            thresholds: EscalationThresholds::default(),
            window_hours: 24,
            moderation: ModerationServiceConfig::default(),
            allowlist_ttl_secs: 60,
            custom_blocked_terms: Vec::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl GuardConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a TOML file; environment variables override file values
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: GuardConfig = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("GUARD_WARNED_THRESHOLD") {
            self.thresholds.warned = v;
        }
        if let Some(v) = env_parse("GUARD_NOTIFIED_THRESHOLD") {
            self.thresholds.notified = v;
        }
        if let Some(v) = env_parse("GUARD_MUTED_THRESHOLD") {
            self.thresholds.muted = v;
        }
        if let Some(v) = env_parse("GUARD_WINDOW_HOURS") {
            self.window_hours = v;
        }
        if let Ok(v) = env::var("MODERATION_API_URL") {
            if !v.trim().is_empty() {
                self.moderation.endpoint = Some(v);
            }
        }
        if let Ok(v) = env::var("MODERATION_API_KEY") {
            self.moderation.api_key = Some(v);
        }
        if let Ok(v) = env::var("MODERATION_POLICY") {
            self.moderation.policy = v;
        }
        if let Some(v) = env_parse("MODERATION_TIMEOUT_MS") {
            self.moderation.timeout_ms = v;
        }
        if let Some(v) = env_parse("ALLOWLIST_TTL_SECS") {
            self.allowlist_ttl_secs = v;
        }
        if let Ok(v) = env::var("GUARD_CUSTOM_BLOCKED_TERMS") {
            self.custom_blocked_terms = v
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.thresholds.validate()?;
        if self.window_hours <= 0 || self.window_hours > MAX_WINDOW_HOURS {
            return Err(format!(
                "Violation window must be between 1 and {} hours",
                MAX_WINDOW_HOURS
            ));
        }
        if self.moderation.timeout_ms == 0 {
            return Err("Moderation timeout must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.moderation.min_score) {
            return Err("Moderation min_score must be between 0 and 1".to_string());
        }
        Ok(())
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours)
    }

    pub fn allowlist_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.allowlist_ttl_secs)
    }

    pub fn moderation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.moderation.timeout_ms)
    }
}
