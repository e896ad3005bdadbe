// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy engine client (C9): a thin, fail-closed HTTP client to the
//! external policy decision point. The policy language itself is out of
//! scope for this crate; this module only ships a request and parses a
//! decision.

use std::time::Duration;

use crate::domain::policy::{PolicyDecision, PolicyEvaluationRequest};

const POLICY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PolicyEngineClient {
    http: reqwest::Client,
    base_url: String,
}

impl PolicyEngineClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(POLICY_TIMEOUT)
            .build()
            .expect("reqwest client must build");
        Self { http, base_url }
    }

    /// Evaluates `request` against the PDP. Any network error, non-2xx
    /// status, or parse error yields a fail-closed denial (§4.7) rather than
    /// propagating an error to the caller.
    pub async fn evaluate(&self, request: &PolicyEvaluationRequest) -> PolicyDecision {
        let url = format!("{}/evaluate", self.base_url.trim_end_matches('/'));
        let response = match self.http.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "policy engine unreachable, failing closed");
                return PolicyDecision::fail_closed(err.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::warn!(status, "policy engine returned non-2xx, failing closed");
            return PolicyDecision::fail_closed(format!("non-2xx status: {}", status));
        }

        match response.json::<PolicyDecision>().await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(error = %err, "failed to parse policy engine response, failing closed");
                PolicyDecision::fail_closed(format!("parse error: {}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_request() -> PolicyEvaluationRequest {
        PolicyEvaluationRequest {
            agent_id: "agent-1".into(),
            agent_type: "llm".into(),
            service: "openai".into(),
            action: "chat.completions".into(),
            trust_score: 50.0,
            permission: serde_json::json!({}),
            wallet_balance: dec!(10.00),
            estimated_cost: dec!(0.05),
            current_hour_request_count: 3,
            hour: 9,
            minute: 30,
            day_of_week: 2,
        }
    }

    #[tokio::test]
    async fn non_2xx_fails_closed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/evaluate").with_status(500).create_async().await;
        let client = PolicyEngineClient::new(server.url());
        let decision = client.evaluate(&sample_request()).await;
        assert!(!decision.allowed);
        assert!(!decision.requires_hitl);
    }

    #[tokio::test]
    async fn malformed_response_fails_closed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/evaluate")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;
        let client = PolicyEngineClient::new(server.url());
        let decision = client.evaluate(&sample_request()).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn allowed_decision_passes_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/evaluate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"allowed":true,"requires_hitl":false,"deny_reasons":[],"raw_response":null}"#)
            .create_async()
            .await;
        let client = PolicyEngineClient::new(server.url());
        let decision = client.evaluate(&sample_request()).await;
        assert!(decision.allowed);
        assert!(!decision.requires_hitl);
    }

    #[tokio::test]
    async fn unreachable_server_fails_closed() {
        let client = PolicyEngineClient::new("http://127.0.0.1:1".into());
        let decision = client.evaluate(&sample_request()).await;
        assert!(!decision.allowed);
        assert!(decision.deny_reasons[0].starts_with("policy engine error"));
    }
}
