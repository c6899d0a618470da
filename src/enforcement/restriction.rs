// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Restriction records awaiting moderator review
//!
//! A restriction starts `Pending` and moves exactly once to `Upheld` or
//! `Overturned`. Resolution details only exist on the terminal variants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ports::PortError;

/// Moderator verdict on a pending restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Upheld,
    Overturned,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Upheld => "upheld",
            Decision::Overturned => "overturned",
        }
    }

    /// Status a restriction resolved with this decision ends in
    pub fn status_kind(&self) -> StatusKind {
        match self {
            Decision::Upheld => StatusKind::Upheld,
            Decision::Overturned => StatusKind::Overturned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolved_at: DateTime<Utc>,
    pub resolved_by: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestrictionStatus {
    Pending,
    Upheld(Resolution),
    Overturned(Resolution),
}

/// Status without resolution details, for filtering and error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Upheld,
    Overturned,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Pending => "pending",
            StatusKind::Upheld => "upheld",
            StatusKind::Overturned => "overturned",
        };
        f.write_str(s)
    }
}

impl RestrictionStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            RestrictionStatus::Pending => StatusKind::Pending,
            RestrictionStatus::Upheld(_) => StatusKind::Upheld,
            RestrictionStatus::Overturned(_) => StatusKind::Overturned,
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            RestrictionStatus::Pending => None,
            RestrictionStatus::Upheld(r) | RestrictionStatus::Overturned(r) => Some(r),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RestrictionStatus::Pending)
    }

    /// The only transition: Pending to a terminal state
    fn resolve(&self, decision: Decision, resolution: Resolution) -> Option<Self> {
        match self {
            RestrictionStatus::Pending => Some(match decision {
                Decision::Upheld => RestrictionStatus::Upheld(resolution),
                Decision::Overturned => RestrictionStatus::Overturned(resolution),
            }),
            RestrictionStatus::Upheld(_) | RestrictionStatus::Overturned(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restriction {
    pub id: Uuid,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub status: RestrictionStatus,
    pub triggers: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Account side effects of the resolution have been applied. A resolved
    /// restriction with this unset can be resolved again with the same decision.
    #[serde(default)]
    pub effects_applied: bool,
}

impl Restriction {
    pub fn pending(user_id: &str, username: Option<String>, triggers: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            username,
            status: RestrictionStatus::Pending,
            triggers,
            created_at: Utc::now(),
            effects_applied: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RestrictionError {
    #[error("Restriction {0} not found")]
    NotFound(Uuid),

    #[error("Restriction {id} already resolved as {status}")]
    AlreadyResolved { id: Uuid, status: StatusKind },

    #[error(transparent)]
    Store(#[from] PortError),
}

/// Result of a conditional insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Restriction),
    /// The user already had a pending restriction; nothing was written
    Existing(Restriction),
}

impl InsertOutcome {
    pub fn restriction(&self) -> &Restriction {
        match self {
            InsertOutcome::Created(r) | InsertOutcome::Existing(r) => r,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionFilter {
    pub status: Option<StatusKind>,
    pub user_id: Option<String>,
    /// Case-insensitive substring match on username
    pub username: Option<String>,
}

impl RestrictionFilter {
    fn matches(&self, r: &Restriction) -> bool {
        if let Some(status) = self.status {
            if r.status.kind() != status {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if &r.user_id != user_id {
                return false;
            }
        }
        if let Some(ref needle) = self.username {
            let needle = needle.to_lowercase();
            match r.username {
                Some(ref name) if name.to_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictionPage {
    pub items: Vec<Restriction>,
    pub total: usize,
}

/// Durable restriction storage
#[async_trait]
pub trait RestrictionStore: Send + Sync {
    /// Insert unless the user already has a pending restriction. The check
    /// and the insert are one atomic step.
    async fn insert_if_no_pending(&self, restriction: Restriction)
        -> Result<InsertOutcome, PortError>;

    async fn get(&self, id: Uuid) -> Result<Option<Restriction>, PortError>;

    /// Conditional update: only a pending restriction is resolved, atomically
    /// with respect to other calls on the same id.
    async fn resolve(
        &self,
        id: Uuid,
        decision: Decision,
        resolution: Resolution,
    ) -> Result<Restriction, RestrictionError>;

    /// Record that the resolution's account side effects are in place
    async fn mark_effects_applied(&self, id: Uuid) -> Result<(), RestrictionError>;

    /// Newest first
    async fn list(
        &self,
        filter: &RestrictionFilter,
        page: Page,
    ) -> Result<RestrictionPage, PortError>;
}

#[derive(Default)]
pub struct InMemoryRestrictionStore {
    rows: RwLock<Vec<Restriction>>,
}

impl InMemoryRestrictionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RestrictionStore for InMemoryRestrictionStore {
    async fn insert_if_no_pending(
        &self,
        restriction: Restriction,
    ) -> Result<InsertOutcome, PortError> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows
            .iter()
            .find(|r| r.user_id == restriction.user_id && r.status.is_pending())
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        rows.push(restriction.clone());
        Ok(InsertOutcome::Created(restriction))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Restriction>, PortError> {
        Ok(self.rows.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn resolve(
        &self,
        id: Uuid,
        decision: Decision,
        resolution: Resolution,
    ) -> Result<Restriction, RestrictionError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RestrictionError::NotFound(id))?;

        let next = row
            .status
            .resolve(decision, resolution)
            .ok_or(RestrictionError::AlreadyResolved {
                id,
                status: row.status.kind(),
            })?;
        row.status = next;
        Ok(row.clone())
    }

    async fn mark_effects_applied(&self, id: Uuid) -> Result<(), RestrictionError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RestrictionError::NotFound(id))?;
        row.effects_applied = true;
        Ok(())
    }

    async fn list(
        &self,
        filter: &RestrictionFilter,
        page: Page,
    ) -> Result<RestrictionPage, PortError> {
        let rows = self.rows.read().await;
        let matching: Vec<&Restriction> = rows.iter().rev().filter(|r| filter.matches(r)).collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(RestrictionPage { items, total })
    }
}
