// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Rolling-window violation counter over an append-only event store
//!
//! Reads fail closed, writes are best effort: a denied submission stays
//! denied even when its event could not be recorded.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::ports::PortError;
use crate::monitoring::GuardMetrics;
use crate::safety::types::BlockSource;

/// One confirmed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub user_id: String,
    pub occurred_at: DateTime<Utc>,
    pub source: BlockSource,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ViolationEvent {
    pub fn now(user_id: &str, source: BlockSource, reasons: &[String]) -> Self {
        Self {
            user_id: user_id.to_string(),
            occurred_at: Utc::now(),
            source,
            reasons: reasons.to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Violation count read failed for {user_id}: {message}")]
    Read { user_id: String, message: String },

    #[error("Violation event write failed for {user_id}: {message}")]
    Write { user_id: String, message: String },
}

/// Append-only event store queried by user and time range.
///
/// `reset` is logical: events already stored stop counting, nothing is deleted.
#[async_trait]
pub trait ViolationEventStore: Send + Sync {
    async fn append(&self, event: ViolationEvent) -> Result<(), PortError>;

    /// Events for `user_id` at or after `since` that were recorded after the
    /// user's last reset
    async fn count_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u64, PortError>;

    async fn reset(&self, user_id: &str) -> Result<(), PortError>;
}

#[derive(Default)]
struct EventLog {
    events: Vec<ViolationEvent>,
    /// Per-user index into `events`; earlier entries no longer count
    reset_marks: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    log: RwLock<EventLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, including ones hidden by a reset
    pub async fn events(&self) -> Vec<ViolationEvent> {
        self.log.read().await.events.clone()
    }
}

#[async_trait]
impl ViolationEventStore for InMemoryEventStore {
    async fn append(&self, event: ViolationEvent) -> Result<(), PortError> {
        self.log.write().await.events.push(event);
        Ok(())
    }

    async fn count_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<u64, PortError> {
        let log = self.log.read().await;
        let start = log.reset_marks.get(user_id).copied().unwrap_or(0);
        let count = log.events[start.min(log.events.len())..]
            .iter()
            .filter(|e| e.user_id == user_id && e.occurred_at >= since)
            .count();
        Ok(count as u64)
    }

    async fn reset(&self, user_id: &str) -> Result<(), PortError> {
        let mut log = self.log.write().await;
        let mark = log.events.len();
        log.reset_marks.insert(user_id.to_string(), mark);
        Ok(())
    }
}

/// Counts confirmed blocks per user over a window anchored at query time
pub struct ViolationCounter {
    store: Arc<dyn ViolationEventStore>,
    window: Duration,
    consecutive_write_failures: AtomicU32,
    metrics: Option<Arc<GuardMetrics>>,
}

impl ViolationCounter {
    /// Counter with the default 24 hour window
    pub fn new(store: Arc<dyn ViolationEventStore>) -> Self {
        Self::with_window(store, Duration::hours(24))
    }

    pub fn with_window(store: Arc<dyn ViolationEventStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            consecutive_write_failures: AtomicU32::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GuardMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a block, then return the user's current count.
    ///
    /// A failed write is logged and counted in metrics; the count that
    /// follows is still read and a failed read is returned as an error.
    pub async fn increment(
        &self,
        user_id: &str,
        source: BlockSource,
        reasons: &[String],
    ) -> Result<u64, CounterError> {
        if let Err(e) = self.record(ViolationEvent::now(user_id, source, reasons)).await {
            let streak = self.consecutive_write_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(ref metrics) = self.metrics {
                metrics.counter_write_failures.inc();
            }
            error!(
                user_id,
                source = %source,
                reasons = ?reasons,
                consecutive_failures = streak,
                "Violation event not recorded, escalation may undercount: {}",
                e
            );
        } else {
            self.consecutive_write_failures.store(0, Ordering::Relaxed);
        }

        self.count(user_id).await
    }

    /// Append one event
    pub async fn record(&self, event: ViolationEvent) -> Result<(), CounterError> {
        let user_id = event.user_id.clone();
        self.store
            .append(event)
            .await
            .map_err(|e| CounterError::Write {
                user_id,
                message: e.to_string(),
            })
    }

    /// Violations in the window ending now
    pub async fn count(&self, user_id: &str) -> Result<u64, CounterError> {
        let since = Utc::now()
            .checked_sub_signed(self.window)
            .ok_or_else(|| CounterError::Read {
                user_id: user_id.to_string(),
                message: format!("window of {} hours is out of range", self.window.num_hours()),
            })?;
        let count = self
            .store
            .count_since(user_id, since)
            .await
            .map_err(|e| CounterError::Read {
                user_id: user_id.to_string(),
                message: e.to_string(),
            })?;
        debug!(user_id, count, "Violation count read");
        Ok(count)
    }

    /// Clear the slate for a user
    pub async fn reset(&self, user_id: &str) -> Result<(), CounterError> {
        self.store
            .reset(user_id)
            .await
            .map_err(|e| CounterError::Write {
                user_id: user_id.to_string(),
                message: e.to_string(),
            })
    }

    pub fn consecutive_write_failures(&self) -> u32 {
        self.consecutive_write_failures.load(Ordering::Relaxed)
    }
}
