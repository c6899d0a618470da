// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Third-party text moderation client
//!
//! Best effort by contract: callers convert any error from this module into a
//! negative classification. A single attempt is made per submission.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::types::SafetyError;

/// Verdict from a text classifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub flagged: bool,
    pub categories: Vec<String>,
}

impl Classification {
    pub fn clean() -> Self {
        Self::default()
    }
}

/// Port for an external text classifier
#[async_trait]
pub trait ExternalClassifier: Send + Sync {
    /// Classify one text. Errors are reported, never swallowed here.
    async fn classify(&self, text: &str) -> Result<Classification, SafetyError>;

    /// Classifier name for logs
    fn name(&self) -> &'static str;
}

/// Classifier used when no moderation service is configured
pub struct DisabledClassifier;

#[async_trait]
impl ExternalClassifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, SafetyError> {
        Ok(Classification::clean())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
    policy: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    flagged: bool,
    categories: Vec<CategoryScore>,
}

#[derive(Debug, Deserialize)]
struct CategoryScore {
    label: String,
    score: f64,
}

/// Parse a moderation service reply. Missing fields are an error, not a default.
///
/// Only categories scoring at or above `min_score` are reported; a flagged
/// reply with no surviving categories is reported as unflagged.
pub fn parse_response(body: &str, min_score: f64) -> Result<Classification, SafetyError> {
    let response: ModerationResponse = serde_json::from_str(body)
        .map_err(|e| SafetyError::MalformedResponse(e.to_string()))?;

    if !response.flagged {
        return Ok(Classification::clean());
    }

    let categories: Vec<String> = response
        .categories
        .into_iter()
        .filter(|c| c.score >= min_score && !c.label.trim().is_empty())
        .map(|c| c.label)
        .collect();

    Ok(Classification {
        flagged: !categories.is_empty(),
        categories,
    })
}

/// HTTP client for a JSON moderation endpoint
pub struct HttpModerationClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    policy: String,
    timeout_ms: u64,
    min_score: f64,
}

impl HttpModerationClient {
    /// Create a client. `timeout_ms` bounds the whole request and must stay
    /// below the admission budget of the caller.
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        policy: &str,
        timeout_ms: u64,
    ) -> Result<Self, SafetyError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| SafetyError::Transport(e.to_string()))?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!(
            "Moderation client configured: endpoint={}, policy={}, timeout={}ms",
            endpoint, policy, timeout_ms
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
            policy: policy.to_string(),
            timeout_ms,
            min_score: 0.5,
        })
    }

    /// Override the minimum category score that counts as a flag
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

#[async_trait]
impl ExternalClassifier for HttpModerationClient {
    async fn classify(&self, text: &str) -> Result<Classification, SafetyError> {
        let url = format!("{}/v1/moderate", self.endpoint);
        debug!("Moderation classify POST {}", url);

        let mut request = self.client.post(&url).json(&ModerationRequest {
            input: text,
            policy: &self.policy,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SafetyError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                SafetyError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SafetyError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                SafetyError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                SafetyError::Transport(e.to_string())
            }
        })?;

        parse_response(&body, self.min_score)
    }

    fn name(&self) -> &'static str {
        "http-moderation"
    }
}
