// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Identity service (C4): agent registration, lookup, and lifecycle
//! transitions, scoped to the owning sponsor.
//!
//! Cross-tenant lookups are indistinguishable from a missing agent: looking
//! up an agent under the wrong sponsor returns `Ok(None)`, never an error
//! that would leak the agent's existence (§4.2, §4.14 step 3).

use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId, AgentRegistrationSpec, SponsorId};
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::infrastructure::crypto::identity_fingerprint;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("agent not found")]
    NotFound,
    #[error("agent is not in a state that allows this transition")]
    InvalidTransition,
}

pub struct IdentityService {
    agents: Arc<dyn AgentRepository>,
}

impl IdentityService {
    pub fn new(agents: Arc<dyn AgentRepository>) -> Self {
        Self { agents }
    }

    /// Registers a new agent under `sponsor_id`. Retries fingerprint
    /// generation on the astronomically unlikely event of a collision
    /// (§4.2: fingerprints are 128 bits of randomness, globally unique by
    /// construction, but the uniqueness constraint is still enforced at the
    /// repository).
    pub async fn register(&self, sponsor_id: SponsorId, spec: AgentRegistrationSpec) -> Result<Agent, IdentityError> {
        const MAX_ATTEMPTS: u8 = 5;
        let mut last_fingerprint = String::new();
        for _ in 0..MAX_ATTEMPTS {
            last_fingerprint = identity_fingerprint(&spec.name, &sponsor_id.to_string());
            if !self.agents.fingerprint_exists(&last_fingerprint).await? {
                let agent = Agent::new(sponsor_id, spec, last_fingerprint);
                self.agents.save(&agent).await?;
                return Ok(agent);
            }
        }
        Err(IdentityError::Repository(RepositoryError::Unknown(format!(
            "could not mint a unique fingerprint after {} attempts (last: {})",
            MAX_ATTEMPTS, last_fingerprint
        ))))
    }

    /// Cross-tenant-safe lookup: `None` both when the agent doesn't exist
    /// and when it exists under a different sponsor.
    pub async fn find_for_sponsor(&self, agent_id: AgentId, sponsor_id: SponsorId) -> Result<Option<Agent>, IdentityError> {
        Ok(self.agents.find_for_sponsor(agent_id, sponsor_id).await?)
    }

    pub async fn list_for_sponsor(&self, sponsor_id: SponsorId, limit: i64, offset: i64) -> Result<Vec<Agent>, IdentityError> {
        Ok(self.agents.list_for_sponsor(sponsor_id, limit, offset).await?)
    }

    pub async fn suspend(&self, agent_id: AgentId, sponsor_id: SponsorId) -> Result<Agent, IdentityError> {
        let mut agent = self.agents.find_for_sponsor(agent_id, sponsor_id).await?.ok_or(IdentityError::NotFound)?;
        if !agent.suspend() {
            return Err(IdentityError::InvalidTransition);
        }
        self.agents.save(&agent).await?;
        Ok(agent)
    }

    pub async fn activate(&self, agent_id: AgentId, sponsor_id: SponsorId) -> Result<Agent, IdentityError> {
        let mut agent = self.agents.find_for_sponsor(agent_id, sponsor_id).await?.ok_or(IdentityError::NotFound)?;
        if !agent.activate() {
            return Err(IdentityError::InvalidTransition);
        }
        self.agents.save(&agent).await?;
        Ok(agent)
    }

    pub async fn revoke(&self, agent_id: AgentId, sponsor_id: SponsorId) -> Result<Agent, IdentityError> {
        let mut agent = self.agents.find_for_sponsor(agent_id, sponsor_id).await?.ok_or(IdentityError::NotFound)?;
        agent.revoke();
        self.agents.save(&agent).await?;
        Ok(agent)
    }

    /// Reserved for the circuit breaker (C10): `any -> panic`, bypassing the
    /// sponsor scope check since this is an internal pipeline call, not a
    /// caller-facing one.
    pub async fn panic(&self, agent_id: AgentId) -> Result<(), IdentityError> {
        let mut agent = self.agents.find_by_id(agent_id).await?.ok_or(IdentityError::NotFound)?;
        agent.panic();
        self.agents.save(&agent).await?;
        Ok(())
    }

    pub async fn adjust_trust(&self, agent_id: AgentId, delta: f64) -> Result<f64, IdentityError> {
        let mut agent = self.agents.find_by_id(agent_id).await?.ok_or(IdentityError::NotFound)?;
        let new_value = agent.adjust_trust(delta);
        self.agents.save(&agent).await?;
        Ok(new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::InMemoryAgentRepository;

    fn service() -> IdentityService {
        IdentityService::new(Arc::new(InMemoryAgentRepository::new()))
    }

    #[tokio::test]
    async fn register_then_lookup_cross_tenant_returns_none() {
        let svc = service();
        let sponsor = SponsorId::new();
        let other_sponsor = SponsorId::new();
        let agent = svc.register(sponsor, AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() }).await.unwrap();

        assert!(svc.find_for_sponsor(agent.id, sponsor).await.unwrap().is_some());
        assert!(svc.find_for_sponsor(agent.id, other_sponsor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suspend_then_activate_round_trips() {
        let svc = service();
        let sponsor = SponsorId::new();
        let agent = svc.register(sponsor, AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() }).await.unwrap();

        let suspended = svc.suspend(agent.id, sponsor).await.unwrap();
        assert!(!suspended.is_active());
        let reactivated = svc.activate(agent.id, sponsor).await.unwrap();
        assert!(reactivated.is_active());
    }

    #[tokio::test]
    async fn revoke_then_panic_is_a_no_op_on_status() {
        let svc = service();
        let sponsor = SponsorId::new();
        let agent = svc.register(sponsor, AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() }).await.unwrap();
        svc.revoke(agent.id, sponsor).await.unwrap();
        svc.panic(agent.id).await.unwrap();
        let reloaded = svc.find_for_sponsor(agent.id, sponsor).await.unwrap().unwrap();
        assert_eq!(reloaded.status, crate::domain::agent::AgentStatus::Revoked);
    }
}
