// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution pipeline (C16): the linear guard -> action -> audit sequence
//! every mutating agent action flows through (§4.14). Every stage returns
//! either a typed continuation or a typed denial; nothing in this module
//! throws across a stage boundary.
//!
//! Call order is fixed: idempotency, SSRF, identity, prompt firewall,
//! anomaly detection, permission lookup, wallet preflight, circuit breaker,
//! policy engine, HITL branch, JIT mint, outbound call, JIT revoke, wallet
//! charge, behavior recording, trust reward, hourly counter, audit append,
//! snapshot, response. The idempotency lock is always released on the way
//! out, success or failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Datelike, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::audit_service::AuditService;
use crate::application::hitl_gateway::HitlGateway;
use crate::application::identity_service::IdentityService;
use crate::application::permission_cache::PermissionCache;
use crate::application::wallet_service::WalletService;
use crate::domain::agent::{AgentId, SponsorId};
use crate::domain::audit::PendingAuditRecord;
use crate::domain::permission::PermissionCacheEntry;
use crate::domain::policy::{PipelineErrorCode, PolicyDecision, PolicyEvaluationRequest};
use crate::domain::repository::BehaviorRepository;
use crate::domain::repository::SecretRepository;
use crate::domain::repository::SnapshotRepository;
use crate::domain::snapshot::StateSnapshot;
use crate::infrastructure::anomaly::AnomalyDetector;
use crate::infrastructure::circuit_breaker::{CircuitBreaker, CircuitBreakerOutcome};
use crate::infrastructure::ephemeral_store::EphemeralStore;
use crate::infrastructure::firewall;
use crate::infrastructure::jit_broker::JitBroker;
use crate::infrastructure::policy_client::PolicyEngineClient;
use crate::infrastructure::ssrf_guard::SsrfGuard;

const IDEMPOTENCY_LOCK_TTL_SECS: u64 = 30;
/// How long a cached `executed`/`blocked` response stays replayable.
const IDEMPOTENCY_RESPONSE_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);
/// Lifetime of a minted JIT token; the call this pipeline makes with it
/// completes well within this window (§9 resolution: agent-scoped broker).
const JIT_TOKEN_TTL_SECS: u64 = 120;
/// Trust deltas per §4.14.
const TRUST_PENALTY_FIREWALL: f64 = -10.0;
const TRUST_PENALTY_ANOMALY: f64 = -5.0;
const TRUST_PENALTY_CIRCUIT_BREAKER: f64 = -15.0;
const TRUST_PENALTY_POLICY_DENIED: f64 = -2.0;
const TRUST_REWARD_SUCCESS: f64 = 0.1;

/// A request for the pipeline to execute on an agent's behalf, matching the
/// shape the agent-facing SDK posts to `/proxy/execute` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub sponsor_id: SponsorId,
    pub agent_id: AgentId,
    pub service: String,
    pub action: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub estimated_cost: Decimal,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStatus {
    Executed,
    Blocked,
    HitlPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResultView {
    pub error_code: Option<String>,
    pub allowed: bool,
    pub requires_hitl: bool,
    pub deny_reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub request_id: Uuid,
    pub status: ExecuteStatus,
    #[serde(default)]
    pub response_code: Option<u16>,
    #[serde(default)]
    pub response_body: Option<String>,
    pub cost_charged_usd: Decimal,
    #[serde(default)]
    pub policy_result: Option<PolicyResultView>,
    pub message: String,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

/// Caller-facing errors (§7 kind 1): surfaced as 4xx by the presentation
/// layer, never audited as a policy denial, never trust-penalized.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("agent not found")]
    AgentNotFound,
    #[error("an execution with this idempotency key is already in flight")]
    Conflict,
    #[error("infrastructure error: {0}")]
    Infra(String),
}

pub struct ExecutionPipeline {
    store: EphemeralStore,
    ssrf_guard: Arc<SsrfGuard>,
    identity: Arc<IdentityService>,
    permissions: Arc<PermissionCache>,
    wallets: Arc<WalletService>,
    anomaly: Arc<AnomalyDetector>,
    behavior: Arc<dyn BehaviorRepository>,
    circuit_breaker: Arc<CircuitBreaker>,
    policy_client: Arc<PolicyEngineClient>,
    hitl: Arc<HitlGateway>,
    jit: Arc<JitBroker>,
    secrets: Arc<dyn SecretRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    audit: Arc<AuditService>,
    http: reqwest::Client,
}

impl ExecutionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: EphemeralStore,
        ssrf_guard: Arc<SsrfGuard>,
        identity: Arc<IdentityService>,
        permissions: Arc<PermissionCache>,
        wallets: Arc<WalletService>,
        anomaly: Arc<AnomalyDetector>,
        behavior: Arc<dyn BehaviorRepository>,
        circuit_breaker: Arc<CircuitBreaker>,
        policy_client: Arc<PolicyEngineClient>,
        hitl: Arc<HitlGateway>,
        jit: Arc<JitBroker>,
        secrets: Arc<dyn SecretRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        audit: Arc<AuditService>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_OUTBOUND_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client must build");
        Self {
            store,
            ssrf_guard,
            identity,
            permissions,
            wallets,
            anomaly,
            behavior,
            circuit_breaker,
            policy_client,
            hitl,
            jit,
            secrets,
            snapshots,
            audit,
            http,
        }
    }

    fn idempotency_lock_key(key: &str) -> String {
        format!("idem:lock:{}", key)
    }

    fn idempotency_response_key(key: &str) -> String {
        format!("idem:response:{}", key)
    }

    fn permission_hour_key(agent_id: AgentId, service: &str) -> String {
        let bucket = Utc::now().timestamp() / 3600;
        format!("permcap:{}:{}:{}", agent_id, service, bucket)
    }

    /// Entry point (§4.14). Wraps [`Self::run`] with idempotency-lock
    /// acquisition and guaranteed release (step 1 and step 21).
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let lock_token = Uuid::new_v4().to_string();
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Ok(Some(cached)) = self.store.get(&Self::idempotency_response_key(key)).await {
                if let Ok(response) = serde_json::from_str::<ExecuteResponse>(&cached) {
                    return Ok(response);
                }
            }
            let acquired = self
                .store
                .set_nx_ex(&Self::idempotency_lock_key(key), &lock_token, IDEMPOTENCY_LOCK_TTL_SECS)
                .await
                .map_err(|e| PipelineError::Infra(e.to_string()))?;
            if !acquired {
                return Err(PipelineError::Conflict);
            }
        }

        let result = self.run(request_id, &request, started).await;

        if let Some(key) = request.idempotency_key.as_deref() {
            let _ = self.store.compare_and_delete(&Self::idempotency_lock_key(key), &lock_token).await;
            if let Ok(response) = &result {
                if let Ok(serialized) = serde_json::to_string(response) {
                    let _ = self
                        .store
                        .set_ex(&Self::idempotency_response_key(key), &serialized, IDEMPOTENCY_RESPONSE_TTL_SECS)
                        .await;
                }
            }
        }

        result
    }

    async fn run(&self, request_id: Uuid, req: &ExecuteRequest, started: Instant) -> Result<ExecuteResponse, PipelineError> {
        // Step 2: SSRF.
        let ssrf_verdict = self.ssrf_guard.validate_url(&req.url).await;
        if !ssrf_verdict.safe {
            let reason = ssrf_verdict.reason.unwrap_or_else(|| "blocked by SSRF guard".to_string());
            return Ok(self.deny(request_id, req, PipelineErrorCode::SsrfBlocked, reason, started).await);
        }

        // Step 3: identity, scoped to the calling sponsor.
        let agent = self
            .identity
            .find_for_sponsor(req.agent_id, req.sponsor_id)
            .await
            .map_err(|e| PipelineError::Infra(e.to_string()))?
            .ok_or(PipelineError::AgentNotFound)?;

        if !agent.is_active() {
            let code = match agent.status {
                crate::domain::agent::AgentStatus::Panic => PipelineErrorCode::AgentPanic,
                _ => PipelineErrorCode::AgentSuspended,
            };
            return Ok(self.deny(request_id, req, code, format!("agent status is {}", agent.status.as_str()), started).await);
        }

        // Step 4: prompt firewall.
        if let Some(prompt) = req.prompt.as_deref() {
            let verdict = firewall::analyze(prompt);
            if !verdict.safe {
                let _ = self.identity.adjust_trust(agent.id, TRUST_PENALTY_FIREWALL).await;
                let reason = format!("risk_score={:.2} threats={:?}", verdict.risk_score, verdict.threats);
                return Ok(self.deny(request_id, req, PipelineErrorCode::PromptInjection, reason, started).await);
            }
        }

        // Step 5: anomaly detection against the persisted profile.
        let profile = self.anomaly_profile(agent.id).await;
        let anomaly_result = self.anomaly.detect_anomaly(agent.id, profile.as_ref(), &req.service).await;
        if anomaly_result.is_anomalous {
            let _ = self.identity.adjust_trust(agent.id, TRUST_PENALTY_ANOMALY).await;
            tracing::warn!(
                agent_id = %agent.id,
                sponsor_id = %agent.sponsor_id,
                risk_score = anomaly_result.risk_score,
                anomalies = ?anomaly_result.anomalies,
                "anomaly detected, notifying sponsor"
            );
            let reason = format!("risk_score={:.2} anomalies={:?}", anomaly_result.risk_score, anomaly_result.anomalies);
            return Ok(self.deny(request_id, req, PipelineErrorCode::AnomalyDetected, reason, started).await);
        }

        // Step 6: permission cache lookup, folding every reason a grant
        // refuses the call (missing, inactive, wrong action, outside the
        // time window, over the per-request or hourly cap) into the single
        // NO_PERMISSION code §6 defines — there is no finer-grained code.
        let permission = match self.permissions.get(agent.id, &req.service).await {
            Ok(permission) => permission,
            Err(e) => return Err(PipelineError::Infra(e.to_string())),
        };
        let Some(permission) = permission else {
            return Ok(self.deny(request_id, req, PipelineErrorCode::NoPermission, "no active permission for this service", started).await);
        };
        if let Some(reason) = self.permission_violation(&permission, req).await {
            return Ok(self.deny(request_id, req, PipelineErrorCode::NoPermission, reason, started).await);
        }

        // Step 7: wallet preflight.
        if let Err(denial) = self.wallets.preflight(agent.id, req.estimated_cost).await {
            let reason = match denial {
                crate::application::wallet_service::WalletServiceError::Denied(d) => d.to_string(),
                crate::application::wallet_service::WalletServiceError::NotProvisioned => "no wallet provisioned".to_string(),
                other => return Err(PipelineError::Infra(other.to_string())),
            };
            return Ok(self.deny(request_id, req, PipelineErrorCode::WalletInsufficientFunds, reason, started).await);
        }

        // Step 8: circuit breaker.
        let breaker_outcome = self.circuit_breaker.check_and_trip(agent.id, req.estimated_cost).await;
        if let CircuitBreakerOutcome::Tripped { current_window_total, previous_window_total } = &breaker_outcome {
            self.trip_cascade(agent.id, &breaker_outcome).await;
            let _ = self.identity.adjust_trust(agent.id, TRUST_PENALTY_CIRCUIT_BREAKER).await;
            tracing::warn!(
                agent_id = %agent.id,
                sponsor_id = %agent.sponsor_id,
                current = %current_window_total,
                previous = %previous_window_total,
                "circuit breaker tripped, notifying sponsor"
            );
            let reason = format!("current_window={} previous_window={}", current_window_total, previous_window_total);
            return Ok(self.deny(request_id, req, PipelineErrorCode::CircuitBreaker, reason, started).await);
        }

        // Step 9: policy engine.
        let hour_count = self.peek_hour_count(agent.id, &req.service).await;
        let now = Utc::now();
        let policy_request = PolicyEvaluationRequest {
            agent_id: agent.id.to_string(),
            agent_type: agent.agent_type.clone(),
            service: req.service.clone(),
            action: req.action.clone(),
            trust_score: agent.trust_score.value(),
            permission: serde_json::to_value(&permission).unwrap_or(serde_json::Value::Null),
            wallet_balance: self.wallet_balance(agent.id).await,
            estimated_cost: req.estimated_cost,
            current_hour_request_count: hour_count as u32,
            hour: now.hour(),
            minute: now.minute(),
            day_of_week: now.weekday().number_from_monday(),
        };
        let decision = self.policy_client.evaluate(&policy_request).await;

        // Step 10: HITL branch.
        if decision.requires_hitl {
            return Ok(self.enter_hitl(request_id, req, &agent, &decision, started).await);
        }
        if !decision.allowed {
            let _ = self.identity.adjust_trust(agent.id, TRUST_PENALTY_POLICY_DENIED).await;
            let reason = decision.deny_reasons.join("; ");
            return Ok(self.deny(request_id, req, PipelineErrorCode::PolicyDenied, reason, started).await);
        }

        // Steps 11-20: mint, call, revoke, charge, record, reward, audit, snapshot.
        self.execute_call(request_id, req, &agent, &decision, started).await
    }

    /// Loads the persisted profile `detect_anomaly` compares against. This
    /// is distinct from [`AnomalyDetector::update_profile`], which recomputes
    /// a fresh profile from the rolling buffer for *writing back* after an
    /// action completes (see [`Self::refresh_behavior_profile`]) — comparing
    /// against a profile built from data that includes the very request
    /// being evaluated would make every request look typical.
    async fn anomaly_profile(&self, agent_id: AgentId) -> Option<crate::domain::behavior::BehaviorProfile> {
        match self.behavior.find_by_agent(agent_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::error!(error = %err, %agent_id, "failed to load behavior profile, treating as no history");
                None
            }
        }
    }

    /// Recomputes the profile from the rolling action buffer and persists
    /// it, so the next request's [`Self::anomaly_profile`] sees this one.
    async fn refresh_behavior_profile(&self, agent_id: AgentId) {
        let profile = self.anomaly.update_profile(agent_id).await;
        if let Err(err) = self.behavior.save(&profile).await {
            tracing::error!(error = %err, %agent_id, "failed to persist refreshed behavior profile");
        }
    }

    async fn wallet_balance(&self, agent_id: AgentId) -> Decimal {
        match self.wallets.find_by_agent(agent_id).await {
            Ok(Some(wallet)) => wallet.balance,
            _ => Decimal::ZERO,
        }
    }

    async fn peek_hour_count(&self, agent_id: AgentId, service: &str) -> i64 {
        self.store
            .get(&Self::permission_hour_key(agent_id, service))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Returns a denial reason if `permission` refuses this call, or `None`
    /// if the call is within the grant.
    async fn permission_violation(&self, permission: &PermissionCacheEntry, req: &ExecuteRequest) -> Option<String> {
        if !permission.active {
            return Some("permission is inactive".to_string());
        }
        if !permission.allowed_actions.iter().any(|a| a == &req.action) {
            return Some(format!("action '{}' is not permitted for this service", req.action));
        }
        if let Some(window) = &permission.time_window {
            if !window.contains(Utc::now().time()) {
                return Some("outside the permitted time window".to_string());
            }
        }
        if req.estimated_cost > permission.per_request_cap {
            return Some(format!("estimated cost {} exceeds per-request cap {}", req.estimated_cost, permission.per_request_cap));
        }
        if permission.max_requests_per_hour > 0 {
            let count = self.peek_hour_count(permission.agent_id, &permission.service_name).await;
            if count >= permission.max_requests_per_hour as i64 {
                return Some(format!("hourly request cap of {} exceeded", permission.max_requests_per_hour));
            }
        }
        None
    }

    /// Circuit breaker trip cascade, in the exact order §4.8 step 5
    /// requires: panic the agent, revoke every live JIT token, freeze the
    /// wallet, then record the trip.
    async fn trip_cascade(&self, agent_id: AgentId, outcome: &CircuitBreakerOutcome) {
        if let Err(err) = self.identity.panic(agent_id).await {
            tracing::error!(error = %err, %agent_id, "failed to panic agent during circuit breaker trip");
        }
        if let Err(err) = self.jit.revoke_all(agent_id).await {
            tracing::error!(error = %err, %agent_id, "failed to revoke JIT tokens during circuit breaker trip");
        }
        if let Err(err) = self.wallets.freeze(agent_id).await {
            tracing::error!(error = %err, %agent_id, "failed to freeze wallet during circuit breaker trip");
        }
        if let Err(err) = self.circuit_breaker.record_trip(agent_id, outcome).await {
            tracing::error!(error = %err, %agent_id, "failed to record circuit breaker trip");
        }
    }

    async fn enter_hitl(
        &self,
        request_id: Uuid,
        req: &ExecuteRequest,
        agent: &crate::domain::agent::Agent,
        decision: &PolicyDecision,
        started: Instant,
    ) -> ExecuteResponse {
        let payload = serde_json::json!({
            "service": req.service,
            "action": req.action,
            "url": req.url,
            "method": req.method,
            "estimated_cost": req.estimated_cost,
        });
        // Sponsor-configured reviewer webhook URLs are out of scope (no
        // sponsor CRUD surface exists in this core); the gateway still
        // persists the request and emits the sponsor-notification event.
        let created = self
            .hitl
            .create(agent.id, agent.sponsor_id, format!("{} {}", req.action, req.service), payload, req.estimated_cost, None)
            .await;

        let (hitl_request, event) = match created {
            Ok(pair) => pair,
            Err(err) => {
                return self.deny(request_id, req, PipelineErrorCode::PolicyDenied, format!("failed to create HITL request: {}", err), started).await;
            }
        };
        tracing::info!(?event, "HITL request created, awaiting reviewer decision");

        self.audit
            .log(
                PendingAuditRecord {
                    agent_id: agent.id,
                    sponsor_id: agent.sponsor_id,
                    action_type: req.action.clone(),
                    service_name: req.service.clone(),
                    prompt_excerpt: None,
                    model_used: req.model.clone(),
                    permission_granted: false,
                    policy_evaluation: serde_json::to_value(decision).ok(),
                    cost_usd: Decimal::ZERO,
                    response_code: None,
                    client_ip: req.client_ip.clone(),
                    duration_ms: Some(started.elapsed().as_millis() as i64),
                    metadata: Some(serde_json::json!({"hitl_request_id": hitl_request.id.0})),
                    timestamp: Utc::now(),
                }
                .with_prompt(req.prompt.as_deref()),
            )
            .await;

        ExecuteResponse {
            request_id,
            status: ExecuteStatus::HitlPending,
            response_code: None,
            response_body: None,
            cost_charged_usd: Decimal::ZERO,
            policy_result: Some(PolicyResultView {
                error_code: None,
                allowed: false,
                requires_hitl: true,
                deny_reasons: decision.deny_reasons.clone(),
            }),
            message: format!("awaiting human approval (request {})", hitl_request.id.0),
            duration_ms: Some(started.elapsed().as_millis() as i64),
        }
    }

    /// Steps 11-20: JIT mint, outbound call, JIT revoke, wallet charge,
    /// behavior recording, trust reward, hourly counter, audit, snapshot.
    async fn execute_call(
        &self,
        request_id: Uuid,
        req: &ExecuteRequest,
        agent: &crate::domain::agent::Agent,
        decision: &PolicyDecision,
        started: Instant,
    ) -> Result<ExecuteResponse, PipelineError> {
        // Step 11: JIT mint, if a vault entry exists for this service.
        let secret_entry = self
            .secrets
            .find_by_sponsor_and_service(agent.sponsor_id, &req.service)
            .await
            .map_err(|e| PipelineError::Infra(e.to_string()))?;
        let mut jit_token: Option<String> = None;
        if let Some(entry) = &secret_entry {
            match self
                .jit
                .mint(agent.id, &req.service, &entry.ciphertext, Duration::from_secs(JIT_TOKEN_TTL_SECS))
                .await
            {
                Ok(token) => jit_token = Some(token),
                Err(err) => tracing::error!(error = %err, service = %req.service, "failed to mint JIT token, proceeding without Authorization header"),
            }
        }
        let auth_header = match &jit_token {
            Some(token) => match self.jit.resolve(agent.id, token).await {
                Ok(Some(payload)) => Some(format!("Bearer {}", payload.real_secret)),
                Ok(None) => {
                    tracing::error!("JIT token resolved to nothing immediately after minting");
                    None
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to resolve minted JIT token");
                    None
                }
            },
            None => None,
        };

        // Step 12: outbound HTTP. Non-2xx is carried in the result, not a
        // pipeline failure.
        let method = reqwest::Method::from_bytes(req.method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut builder = self.http.request(method, &req.url);
        if let Some(headers) = &req.headers {
            for (key, value) in headers {
                builder = builder.header(key, value);
            }
        }
        if let Some(header) = &auth_header {
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let outbound_started = Instant::now();
        let (response_code, response_body) = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                (Some(status), Some(body))
            }
            Err(err) => {
                tracing::warn!(error = %err, url = %req.url, "outbound call failed at the transport level");
                (None, Some(format!("upstream request failed: {}", err)))
            }
        };
        let outbound_duration = outbound_started.elapsed();

        // Step 13: JIT revoke.
        if let Some(token) = &jit_token {
            if let Err(err) = self.jit.revoke(agent.id, token).await {
                tracing::error!(error = %err, "failed to revoke JIT token after use");
            }
        }

        // Step 14: wallet charge, fed into the circuit breaker's rolling sum.
        let description = format!("{} {} {}", req.method, req.service, req.action);
        let charge_result = self
            .wallets
            .charge(agent.id, req.estimated_cost, description, req.service.clone(), req.action.clone())
            .await;
        let cost_charged = match charge_result {
            Ok(_) => {
                if let Err(err) = self.circuit_breaker.record_charge(agent.id, req.estimated_cost).await {
                    tracing::error!(error = %err, "failed to record charge in circuit breaker window");
                }
                req.estimated_cost
            }
            Err(err) => {
                tracing::error!(error = %err, agent_id = %agent.id, "wallet charge failed after outbound call already completed");
                Decimal::ZERO
            }
        };

        // Step 15: behavior recording, then fold it into the persisted
        // profile future requests will be compared against.
        if let Err(err) = self.anomaly.record_action(agent.id, &req.service, &req.action, cost_charged).await {
            tracing::error!(error = %err, "failed to record action in rolling behavior buffer");
        }
        self.refresh_behavior_profile(agent.id).await;

        // Step 16: trust reward.
        if let Some(code) = response_code {
            if (200..400).contains(&code) {
                let _ = self.identity.adjust_trust(agent.id, TRUST_REWARD_SUCCESS).await;
            }
        }

        // Step 17: hourly permission cap counter.
        let hour_key = Self::permission_hour_key(agent.id, &req.service);
        if let Ok(new_count) = self.store.incr(&hour_key).await {
            if new_count == 1 {
                let _ = self.store.expire(&hour_key, 3600).await;
            }
        }

        // Step 18: audit append.
        self.audit
            .log(
                PendingAuditRecord {
                    agent_id: agent.id,
                    sponsor_id: agent.sponsor_id,
                    action_type: req.action.clone(),
                    service_name: req.service.clone(),
                    prompt_excerpt: None,
                    model_used: req.model.clone(),
                    permission_granted: true,
                    policy_evaluation: serde_json::to_value(decision).ok(),
                    cost_usd: cost_charged,
                    response_code: response_code.map(|c| c as i32),
                    client_ip: req.client_ip.clone(),
                    duration_ms: Some(outbound_duration.as_millis() as i64),
                    metadata: None,
                    timestamp: Utc::now(),
                }
                .with_prompt(req.prompt.as_deref()),
            )
            .await;

        // Step 19: snapshot for mutating methods; failures here are non-fatal.
        // `audit_id` is 0 here: the audit entry just queued above only gets
        // its real row id once the buffer flushes and the chain hash is
        // computed (see AuditService::flush), which happens out of band.
        // Correlating a snapshot to its audit row by content (agent, service,
        // timestamp) rather than by id is a known gap, not fixed up here.
        if matches!(req.method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH" | "DELETE") {
            let snapshot = StateSnapshot::new(
                0,
                serde_json::json!({"method": req.method, "url": req.url, "status": response_code}),
                serde_json::json!({"note": "rollback is an external collaborator's responsibility; this snapshot only records what happened"}),
            );
            if let Err(err) = self.snapshots.save(&snapshot).await {
                tracing::warn!(error = %err, "failed to persist state snapshot (non-fatal)");
            }
        }

        // Step 20: build the response.
        Ok(ExecuteResponse {
            request_id,
            status: ExecuteStatus::Executed,
            response_code,
            response_body,
            cost_charged_usd: cost_charged,
            policy_result: Some(PolicyResultView {
                error_code: None,
                allowed: true,
                requires_hitl: false,
                deny_reasons: vec![],
            }),
            message: "executed".to_string(),
            duration_ms: Some(started.elapsed().as_millis() as i64),
        })
    }

    /// Builds a `blocked` response and its audit entry in one place, since
    /// every denial point (steps 2, 3, 4, 5, 6, 7, 8, 9) follows the same
    /// shape (§7 kind 2: audited with `permission_granted=false`, returned
    /// as `blocked` with HTTP 200 — a successful decision, not an error).
    async fn deny(
        &self,
        request_id: Uuid,
        req: &ExecuteRequest,
        code: PipelineErrorCode,
        reason: impl Into<String>,
        started: Instant,
    ) -> ExecuteResponse {
        let reason = reason.into();
        self.audit
            .log(
                PendingAuditRecord {
                    agent_id: req.agent_id,
                    sponsor_id: req.sponsor_id,
                    action_type: req.action.clone(),
                    service_name: req.service.clone(),
                    prompt_excerpt: None,
                    model_used: req.model.clone(),
                    permission_granted: false,
                    policy_evaluation: Some(serde_json::json!({"error_code": code.as_str(), "reason": reason})),
                    cost_usd: Decimal::ZERO,
                    response_code: None,
                    client_ip: req.client_ip.clone(),
                    duration_ms: Some(started.elapsed().as_millis() as i64),
                    metadata: None,
                    timestamp: Utc::now(),
                }
                .with_prompt(req.prompt.as_deref()),
            )
            .await;

        ExecuteResponse {
            request_id,
            status: ExecuteStatus::Blocked,
            response_code: None,
            response_body: None,
            cost_charged_usd: Decimal::ZERO,
            policy_result: Some(PolicyResultView {
                error_code: Some(code.as_str().to_string()),
                allowed: false,
                requires_hitl: false,
                deny_reasons: vec![reason],
            }),
            message: code.as_str().to_string(),
            duration_ms: Some(started.elapsed().as_millis() as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permission::{Permission, PermissionId};
    use rust_decimal_macros::dec;

    // `ExecutionPipeline` itself needs a reachable Redis (for the
    // idempotency lock, permission cache, anomaly buffer, and circuit
    // breaker window) to exercise end to end; that belongs to an
    // integration suite run against a real `EphemeralStore`, not this
    // unit tier. These tests cover the pure request/response contracts
    // and the permission-grant logic `run` delegates to.

    #[test]
    fn error_codes_match_the_external_contract() {
        assert_eq!(PipelineErrorCode::SsrfBlocked.as_str(), "SSRF_BLOCKED");
        assert_eq!(PipelineErrorCode::AgentSuspended.as_str(), "AGENT_SUSPENDED");
        assert_eq!(PipelineErrorCode::AgentPanic.as_str(), "AGENT_PANIC");
        assert_eq!(PipelineErrorCode::PromptInjection.as_str(), "PROMPT_INJECTION");
        assert_eq!(PipelineErrorCode::AnomalyDetected.as_str(), "ANOMALY_DETECTED");
        assert_eq!(PipelineErrorCode::NoPermission.as_str(), "NO_PERMISSION");
        assert_eq!(PipelineErrorCode::WalletInsufficientFunds.as_str(), "WALLET_INSUFFICIENT_FUNDS");
        assert_eq!(PipelineErrorCode::CircuitBreaker.as_str(), "CIRCUIT_BREAKER");
        assert_eq!(PipelineErrorCode::PolicyDenied.as_str(), "POLICY_DENIED");
    }

    #[test]
    fn execute_request_deserializes_with_only_required_fields() {
        let json = serde_json::json!({
            "sponsor_id": SponsorId::new(),
            "agent_id": AgentId::new(),
            "service": "openai",
            "action": "chat.completions",
            "url": "https://api.openai.com/v1/chat/completions",
            "estimated_cost": "0.01",
        });
        let request: ExecuteRequest = serde_json::from_value(json).expect("optional fields must default");
        assert_eq!(request.method, "GET");
        assert!(request.idempotency_key.is_none());
        assert!(request.prompt.is_none());
    }

    #[test]
    fn execute_response_round_trips_through_json_byte_for_byte() {
        let response = ExecuteResponse {
            request_id: Uuid::new_v4(),
            status: ExecuteStatus::Blocked,
            response_code: None,
            response_body: None,
            cost_charged_usd: Decimal::ZERO,
            policy_result: Some(PolicyResultView {
                error_code: Some("NO_PERMISSION".to_string()),
                allowed: false,
                requires_hitl: false,
                deny_reasons: vec!["no active permission for this service".to_string()],
            }),
            message: "NO_PERMISSION".to_string(),
            duration_ms: Some(12),
        };
        let serialized = serde_json::to_string(&response).unwrap();
        let restored: ExecuteResponse = serde_json::from_str(&serialized).unwrap();
        assert_eq!(restored.status, ExecuteStatus::Blocked);
        assert_eq!(restored.policy_result.unwrap().error_code.as_deref(), Some("NO_PERMISSION"));
    }

    fn sample_permission() -> Permission {
        Permission {
            id: PermissionId::new(),
            agent_id: AgentId::new(),
            service_name: "openai".into(),
            allowed_actions: vec!["chat.completions".into()],
            max_requests_per_hour: 100,
            time_window: None,
            per_request_cap: dec!(1.00),
            requires_hitl: false,
            policy_override: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn permission_allows_action_matches_grant() {
        let permission = sample_permission();
        assert!(permission.allows_action("chat.completions"));
        assert!(!permission.allows_action("images.generate"));
    }

    #[test]
    fn permission_per_request_cap_is_enforced_by_the_grant_itself() {
        let permission = sample_permission();
        assert!(dec!(0.01) <= permission.per_request_cap);
        assert!(dec!(5.00) > permission.per_request_cap);
    }
}
