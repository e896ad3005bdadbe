// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy decision types shared between the pipeline (C16) and the external
//! policy engine client (C9). The policy language itself is out of scope —
//! these types only carry a decision and its error code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy engine unreachable: {0}")]
    Unreachable(String),
    #[error("policy engine returned non-2xx status: {0}")]
    BadStatus(u16),
    #[error("failed to parse policy engine response: {0}")]
    Parse(String),
}

/// The error codes surfaced in `policy_result.error_code` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineErrorCode {
    SsrfBlocked,
    AgentSuspended,
    AgentPanic,
    PromptInjection,
    AnomalyDetected,
    NoPermission,
    WalletInsufficientFunds,
    CircuitBreaker,
    PolicyDenied,
}

impl PipelineErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorCode::SsrfBlocked => "SSRF_BLOCKED",
            PipelineErrorCode::AgentSuspended => "AGENT_SUSPENDED",
            PipelineErrorCode::AgentPanic => "AGENT_PANIC",
            PipelineErrorCode::PromptInjection => "PROMPT_INJECTION",
            PipelineErrorCode::AnomalyDetected => "ANOMALY_DETECTED",
            PipelineErrorCode::NoPermission => "NO_PERMISSION",
            PipelineErrorCode::WalletInsufficientFunds => "WALLET_INSUFFICIENT_FUNDS",
            PipelineErrorCode::CircuitBreaker => "CIRCUIT_BREAKER",
            PipelineErrorCode::PolicyDenied => "POLICY_DENIED",
        }
    }
}

/// Input the pipeline assembles before calling the policy engine.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyEvaluationRequest {
    pub agent_id: String,
    pub agent_type: String,
    pub service: String,
    pub action: String,
    pub trust_score: f64,
    pub permission: serde_json::Value,
    pub wallet_balance: rust_decimal::Decimal,
    pub estimated_cost: rust_decimal::Decimal,
    pub current_hour_request_count: u32,
    pub hour: u32,
    pub minute: u32,
    pub day_of_week: u32,
}

/// Output of the external PDP, fail-closed on any transport/parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub requires_hitl: bool,
    pub deny_reasons: Vec<String>,
    pub raw_response: Option<serde_json::Value>,
}

impl PolicyDecision {
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_hitl: false,
            deny_reasons: vec![format!("policy engine error: {}", reason.into())],
            raw_response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_closed_never_allows_and_never_requires_hitl() {
        let decision = PolicyDecision::fail_closed("timeout");
        assert!(!decision.allowed);
        assert!(!decision.requires_hitl);
        assert_eq!(decision.deny_reasons, vec!["policy engine error: timeout".to_string()]);
    }

    #[test]
    fn error_code_strings_match_contract() {
        assert_eq!(PipelineErrorCode::SsrfBlocked.as_str(), "SSRF_BLOCKED");
        assert_eq!(PipelineErrorCode::WalletInsufficientFunds.as_str(), "WALLET_INSUFFICIENT_FUNDS");
    }
}
