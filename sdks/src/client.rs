// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ExecuteRequest, ExecuteResponse, HitlRequest, HitlStatus, SponsorId};

const DEFAULT_TIMEOUT_SECS: u64 = 35;

#[derive(Debug, Error)]
pub enum AegisClientError {
    #[error("request to the proxy failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent or sponsor not found")]
    NotFound,
    #[error("an execution with this idempotency key is already in flight")]
    Conflict,
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("proxy returned an unexpected status {0}")]
    UnexpectedStatus(StatusCode),
}

/// Thin client for the execution proxy's HTTP surface (§6): the agent host
/// posts every outbound call through [`execute`](AegisClient::execute)
/// instead of calling the third-party service directly, and polls the HITL
/// endpoints while a request is pending a human decision.
pub struct AegisClient {
    base_url: String,
    http: Client,
    idempotency_key: Option<String>,
}

impl AegisClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::builder()
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .build()
                .expect("reqwest client configuration is valid"),
            idempotency_key: None,
        }
    }

    /// Sets the `X-Idempotency-Key` sent with every subsequent call to
    /// [`execute`](AegisClient::execute). Callers that want a distinct key
    /// per call should instead set `request.idempotency_key` directly.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, AegisClientError> {
        let url = format!("{}/proxy/execute", self.base_url);
        let mut builder = self.http.post(url).json(&request);
        if let Some(key) = &self.idempotency_key {
            builder = builder.header("x-idempotency-key", key);
        }
        let response = builder.send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(AegisClientError::NotFound),
            StatusCode::CONFLICT => Err(AegisClientError::Conflict),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(AegisClientError::RateLimited { retry_after_secs })
            }
            status => Err(AegisClientError::UnexpectedStatus(status)),
        }
    }

    pub async fn list_pending_hitl(&self, sponsor_id: SponsorId) -> Result<Vec<HitlRequest>, AegisClientError> {
        let url = format!("{}/hitl/pending", self.base_url);
        let response = self.http.get(url).query(&[("sponsor_id", sponsor_id.0.to_string())]).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => Err(AegisClientError::UnexpectedStatus(status)),
        }
    }

    pub async fn decide_hitl(
        &self,
        request_id: Uuid,
        decider: impl Into<String>,
        approved: bool,
        note: Option<String>,
    ) -> Result<HitlStatus, AegisClientError> {
        let url = format!("{}/hitl/{}/decide", self.base_url, request_id);
        let body = serde_json::json!({ "decider": decider.into(), "approved": approved, "note": note });
        let response = self.http.post(url).json(&body).send().await?;
        match response.status() {
            StatusCode::OK => {
                #[derive(serde::Deserialize)]
                struct DecideResponse {
                    status: HitlStatus,
                }
                Ok(response.json::<DecideResponse>().await?.status)
            }
            StatusCode::NOT_FOUND => Err(AegisClientError::NotFound),
            status => Err(AegisClientError::UnexpectedStatus(status)),
        }
    }

    pub async fn healthy(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        self.http.get(url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_stores_idempotency_key() {
        let client = AegisClient::new("http://127.0.0.1:8443").with_idempotency_key("req-1");
        assert_eq!(client.idempotency_key.as_deref(), Some("req-1"));
    }
}
