// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Collaborator interfaces used by enforcement, with in-process implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Failure reported by an external collaborator
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Account store error: {0}")]
    Account(String),

    #[error("Session service error: {0}")]
    Session(String),

    #[error("Notification dispatch error: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Account fields owned by this engine
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Provisional mute, set by automated enforcement or cleared on overturn
    async fn set_muted(&self, user_id: &str, muted: bool) -> Result<(), PortError>;

    /// Moderator-confirmed mute
    async fn confirm_mute(&self, user_id: &str) -> Result<(), PortError>;

    /// Clear any per-account violation bookkeeping
    async fn reset_violation_state(&self, user_id: &str) -> Result<(), PortError>;
}

/// Must be safe to call repeatedly for the same user
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn invalidate_sessions(&self, user_id: &str) -> Result<(), PortError>;
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver a notification. Redelivery with the same `idempotency_key` must
    /// not notify twice.
    async fn notify(
        &self,
        user_id: &str,
        kind: &str,
        idempotency_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PortError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub muted: bool,
    pub mute_confirmed: bool,
    pub violation_resets: u32,
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, AccountState>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self, user_id: &str) -> AccountState {
        self.accounts
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn set_muted(&self, user_id: &str, muted: bool) -> Result<(), PortError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(user_id.to_string()).or_default();
        state.muted = muted;
        if !muted {
            state.mute_confirmed = false;
        }
        Ok(())
    }

    async fn confirm_mute(&self, user_id: &str) -> Result<(), PortError> {
        let mut accounts = self.accounts.write().await;
        let state = accounts.entry(user_id.to_string()).or_default();
        state.muted = true;
        state.mute_confirmed = true;
        Ok(())
    }

    async fn reset_violation_state(&self, user_id: &str) -> Result<(), PortError> {
        let mut accounts = self.accounts.write().await;
        accounts.entry(user_id.to_string()).or_default().violation_resets += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionService {
    invalidations: RwLock<HashMap<String, u32>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times sessions were invalidated for a user
    pub async fn invalidation_count(&self, user_id: &str) -> u32 {
        self.invalidations
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn invalidate_sessions(&self, user_id: &str) -> Result<(), PortError> {
        *self
            .invalidations
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert(0) += 1;
        debug!(user_id, "Sessions invalidated");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredNotification {
    pub user_id: String,
    pub kind: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
}

/// Records deliveries, dropping repeats of an idempotency key
#[derive(Default)]
pub struct InMemoryNotifier {
    seen: RwLock<HashSet<String>>,
    delivered: RwLock<Vec<DeliveredNotification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<DeliveredNotification> {
        self.delivered.read().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotifier {
    async fn notify(
        &self,
        user_id: &str,
        kind: &str,
        idempotency_key: &str,
        payload: serde_json::Value,
    ) -> Result<(), PortError> {
        if !self.seen.write().await.insert(idempotency_key.to_string()) {
            debug!(idempotency_key, "Duplicate notification dropped");
            return Ok(());
        }
        self.delivered.write().await.push(DeliveredNotification {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            idempotency_key: idempotency_key.to_string(),
            payload,
        });
        Ok(())
    }
}
