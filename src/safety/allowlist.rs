// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Moderator-approved pattern exceptions
//!
//! Entries are keyed by `(trigger, category)`. The cache holds a snapshot of
//! every entry, reloaded after its TTL and dropped by `bust()` on writes in
//! this process. Other processes pick up a write within one TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::patterns::normalize;
use super::types::{AuditOutcome, BlockSource, SafetyError};

/// Canonical `(trigger, category)` key. The trigger is normalized the same
/// way the pattern auditor normalizes prompt text, so an entry written as the
/// user typed it matches the reported hit.
pub fn allowlist_key(trigger: &str, category: &str) -> (String, String) {
    (normalize(trigger), category.trim().to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowlistEntry {
    pub trigger: String,
    pub category: String,
    pub added_by: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restriction_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AllowlistEntry {
    pub fn new(
        trigger: &str,
        category: &str,
        added_by: impl Into<String>,
        reason: impl Into<String>,
        restriction_id: Option<Uuid>,
    ) -> Self {
        let (trigger, category) = allowlist_key(trigger, category);
        let now = Utc::now();
        Self {
            trigger,
            category,
            added_by: added_by.into(),
            reason: reason.into(),
            restriction_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> (String, String) {
        allowlist_key(&self.trigger, &self.category)
    }
}

/// Durable store behind the allowlist cache
#[async_trait]
pub trait AllowlistStore: Send + Sync {
    /// Insert, or update `added_by`/`reason` of the entry with the same key
    async fn upsert(&self, entry: AllowlistEntry) -> Result<AllowlistEntry, SafetyError>;

    /// Remove an entry, returning whether it existed
    async fn remove(&self, trigger: &str, category: &str) -> Result<bool, SafetyError>;

    /// Every entry
    async fn list(&self) -> Result<Vec<AllowlistEntry>, SafetyError>;
}

/// In-process allowlist store
#[derive(Default)]
pub struct InMemoryAllowlistStore {
    entries: RwLock<BTreeMap<(String, String), AllowlistEntry>>,
}

impl InMemoryAllowlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AllowlistStore for InMemoryAllowlistStore {
    async fn upsert(&self, entry: AllowlistEntry) -> Result<AllowlistEntry, SafetyError> {
        let mut entries = self.entries.write().await;
        let stored = match entries.get_mut(&entry.key()) {
            Some(existing) => {
                existing.added_by = entry.added_by;
                existing.reason = entry.reason;
                if entry.restriction_id.is_some() {
                    existing.restriction_id = entry.restriction_id;
                }
                existing.updated_at = Utc::now();
                existing.clone()
            }
            None => {
                entries.insert(entry.key(), entry.clone());
                entry
            }
        };
        Ok(stored)
    }

    async fn remove(&self, trigger: &str, category: &str) -> Result<bool, SafetyError> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&allowlist_key(trigger, category)).is_some())
    }

    async fn list(&self) -> Result<Vec<AllowlistEntry>, SafetyError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }
}

struct Snapshot {
    keys: HashSet<(String, String)>,
    loaded_at: Instant,
}

/// TTL cache over an [`AllowlistStore`]
pub struct AllowlistCache {
    store: Arc<dyn AllowlistStore>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    /// Bumped by every bust; a load that started under an older value is discarded
    generation: AtomicU64,
}

impl AllowlistCache {
    pub fn new(store: Arc<dyn AllowlistStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn AllowlistStore> {
        &self.store
    }

    /// Reload every entry from the store, returning the entry count.
    ///
    /// A load overtaken by `bust()` is not installed, since it may predate
    /// the write that caused the bust.
    pub async fn refresh(&self) -> Result<usize, SafetyError> {
        let generation = self.generation.load(Ordering::Acquire);
        let entries = self.store.list().await?;
        let keys: HashSet<(String, String)> = entries.iter().map(AllowlistEntry::key).collect();
        let count = keys.len();

        let mut snapshot = self.snapshot.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Allowlist load overtaken by a bust, discarding {} entries", count);
            return Ok(count);
        }
        *snapshot = Some(Snapshot {
            keys,
            loaded_at: Instant::now(),
        });
        debug!("Allowlist cache refreshed: {} entries", count);
        Ok(count)
    }

    /// Drop the snapshot; the next lookup reloads from the store
    pub async fn bust(&self) {
        let mut snapshot = self.snapshot.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *snapshot = None;
        debug!("Allowlist cache busted");
    }

    async fn is_fresh(&self) -> bool {
        match self.snapshot.read().await.as_ref() {
            Some(s) => s.loaded_at.elapsed() < self.ttl,
            None => false,
        }
    }

    async fn ensure_loaded(&self) {
        if self.is_fresh().await {
            return;
        }
        if let Err(e) = self.refresh().await {
            // Keep serving the stale snapshot, if any; with none, nothing is exempt
            warn!("Allowlist refresh failed, using previous snapshot: {}", e);
        }
    }

    /// Whether `(trigger, category)` is an approved exception
    pub async fn is_allowed(&self, trigger: &str, category: &str) -> bool {
        self.ensure_loaded().await;
        let key = allowlist_key(trigger, category);
        match self.snapshot.read().await.as_ref() {
            Some(s) => s.keys.contains(&key),
            None => false,
        }
    }

    /// Strip allowlisted hits from a local-pattern outcome. A reason survives
    /// while at least one of its hits is not allowlisted.
    pub async fn filter(&self, outcome: AuditOutcome) -> AuditOutcome {
        if !outcome.blocked || outcome.source != BlockSource::LocalPattern {
            return outcome;
        }

        self.ensure_loaded().await;
        let guard = self.snapshot.read().await;
        let keys = match guard.as_ref() {
            Some(s) if !s.keys.is_empty() => &s.keys,
            _ => return outcome,
        };

        let remaining: Vec<_> = outcome
            .matches
            .into_iter()
            .filter(|m| !keys.contains(&allowlist_key(&m.trigger, &m.category)))
            .collect();

        AuditOutcome::from_matches(remaining)
    }
}
