// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HITL (human-in-the-loop) gateway (C12): creates pending approval
//! requests, notifies the sponsor's configured reviewer endpoint, and
//! applies reviewer decisions.
//!
//! The state machine itself (`pending -> {approved, rejected, expired}`,
//! terminal states sticky) lives on [`HitlRequest::decide`]; this service is
//! the orchestration around it — persistence, webhook notification, and the
//! sponsor-notification event the pipeline turns into a response.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::domain::agent::{AgentId, SponsorId};
use crate::domain::events::SponsorNotification;
use crate::domain::hitl::{HitlRequest, HitlRequestId, HitlStatus};
use crate::domain::repository::{HitlRepository, RepositoryError};
use crate::infrastructure::webhook::WebhookClient;

#[derive(Debug, thiserror::Error)]
pub enum HitlError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("HITL request not found")]
    NotFound,
}

pub struct HitlGateway {
    requests: Arc<dyn HitlRepository>,
    webhook: Arc<WebhookClient>,
}

impl HitlGateway {
    pub fn new(requests: Arc<dyn HitlRepository>, webhook: Arc<WebhookClient>) -> Self {
        Self { requests, webhook }
    }

    /// Creates a pending request and best-effort notifies `notify_url` if
    /// the sponsor configured one. Returns the request plus the
    /// notification event for the pipeline to forward to the alerting sink.
    pub async fn create(
        &self,
        agent_id: AgentId,
        sponsor_id: SponsorId,
        action_description: String,
        payload: serde_json::Value,
        estimated_cost: Decimal,
        notify_url: Option<&str>,
    ) -> Result<(HitlRequest, SponsorNotification), HitlError> {
        let request = HitlRequest::new(agent_id, sponsor_id, action_description, payload, estimated_cost);
        self.requests.save(&request).await?;

        let event = SponsorNotification::HitlRequestCreated {
            request_id: request.id,
            agent_id,
            sponsor_id,
            estimated_cost,
            is_high_cost: request.is_high_cost(),
            created_at: request.created_at,
        };

        if let Some(url) = notify_url {
            let body = serde_json::json!({
                "event": "hitl.created",
                "request_id": request.id.0,
                "agent_id": agent_id.to_string(),
                "action_description": request.action_description,
                "estimated_cost": request.estimated_cost,
                "expires_at": request.expires_at,
            });
            self.webhook.deliver(url, &body).await;
        }

        Ok((request, event))
    }

    pub async fn list_pending(&self, sponsor_id: SponsorId) -> Result<Vec<HitlRequest>, HitlError> {
        Ok(self.requests.list_pending(sponsor_id).await?)
    }

    pub async fn find_by_id(&self, id: HitlRequestId) -> Result<Option<HitlRequest>, HitlError> {
        Ok(self.requests.find_by_id(id).await?)
    }

    /// Applies a reviewer decision. Returns the resulting status (which may
    /// be `Expired` rather than the requested decision, or an already
    /// terminal status if the request had already been decided — both are
    /// legitimate, not errors, per [`HitlRequest::decide`]'s contract).
    pub async fn decide(
        &self,
        id: HitlRequestId,
        decider: String,
        approved: bool,
        note: Option<String>,
    ) -> Result<(HitlStatus, SponsorNotification), HitlError> {
        let mut request = self.requests.find_by_id(id).await?.ok_or(HitlError::NotFound)?;
        let now = Utc::now();
        let status = request.decide(decider, approved, note, now);
        self.requests.save(&request).await?;

        let event = SponsorNotification::HitlRequestDecided {
            request_id: request.id,
            agent_id: request.agent_id,
            sponsor_id: request.sponsor_id,
            approved: status == HitlStatus::Approved,
            decided_at: now,
        };
        Ok((status, event))
    }

    /// Polls a pending request's wall-clock expiry without requiring a
    /// reviewer decision; used by the scheduler to flip stale requests to
    /// `expired` proactively (not required for correctness — `decide`
    /// already enforces expiry at decision time — but keeps `list_pending`
    /// accurate between decisions).
    pub async fn expire_if_due(&self, id: HitlRequestId) -> Result<HitlStatus, HitlError> {
        let mut request = self.requests.find_by_id(id).await?.ok_or(HitlError::NotFound)?;
        if request.status == HitlStatus::Pending && Utc::now() > request.expires_at {
            request.status = HitlStatus::Expired;
            request.decided_at = Some(Utc::now());
            self.requests.save(&request).await?;
        }
        Ok(request.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::InMemoryHitlRepository;

    fn gateway() -> HitlGateway {
        HitlGateway::new(Arc::new(InMemoryHitlRepository::new()), Arc::new(WebhookClient::new("test-secret".into())))
    }

    #[tokio::test]
    async fn create_then_decide_approved() {
        let gw = gateway();
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let (request, _event) = gw
            .create(agent_id, sponsor_id, "wire transfer".into(), serde_json::json!({}), Decimal::from(25), None)
            .await
            .unwrap();

        let (status, event) = gw.decide(request.id, "alice".into(), true, None).await.unwrap();
        assert_eq!(status, HitlStatus::Approved);
        assert!(matches!(event, SponsorNotification::HitlRequestDecided { approved: true, .. }));
    }

    #[tokio::test]
    async fn list_pending_excludes_decided() {
        let gw = gateway();
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let (r1, _) = gw.create(agent_id, sponsor_id, "a".into(), serde_json::json!({}), Decimal::from(1), None).await.unwrap();
        let (_r2, _) = gw.create(agent_id, sponsor_id, "b".into(), serde_json::json!({}), Decimal::from(1), None).await.unwrap();
        gw.decide(r1.id, "alice".into(), true, None).await.unwrap();

        let pending = gw.list_pending(sponsor_id).await.unwrap();
        assert_eq!(pending.len(), 1);
    }
}
