// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Prometheus counters for the admission gate and enforcement

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct GuardMetrics {
    registry: Registry,
    /// Audits by outcome: admitted, blocked, error
    pub audits: IntCounterVec,
    /// Blocks by source: local-pattern, external-service
    pub blocks: IntCounterVec,
    pub external_failures: IntCounter,
    pub counter_write_failures: IntCounter,
    pub enforcement_failures: IntCounter,
    pub notification_failures: IntCounter,
    pub mutes: IntCounter,
}

impl GuardMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let audits = IntCounterVec::new(
            Opts::new("guard_audits_total", "Prompt audits by outcome"),
            &["outcome"],
        )?;
        let blocks = IntCounterVec::new(
            Opts::new("guard_blocks_total", "Blocked prompts by source"),
            &["source"],
        )?;
        let external_failures = IntCounter::new(
            "guard_external_failures_total",
            "Moderation service calls that failed open",
        )?;
        let counter_write_failures = IntCounter::new(
            "guard_counter_write_failures_total",
            "Violation events that could not be recorded",
        )?;
        let enforcement_failures = IntCounter::new(
            "guard_enforcement_failures_total",
            "Automated mutes that could not be applied",
        )?;
        let notification_failures = IntCounter::new(
            "guard_notification_failures_total",
            "Restriction outcome notifications that failed",
        )?;
        let mutes = IntCounter::new("guard_mutes_total", "Automated mutes applied")?;

        registry.register(Box::new(audits.clone()))?;
        registry.register(Box::new(blocks.clone()))?;
        registry.register(Box::new(external_failures.clone()))?;
        registry.register(Box::new(counter_write_failures.clone()))?;
        registry.register(Box::new(enforcement_failures.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;
        registry.register(Box::new(mutes.clone()))?;

        Ok(Self {
            registry,
            audits,
            blocks,
            external_failures,
            counter_write_failures,
            enforcement_failures,
            notification_failures,
            mutes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
