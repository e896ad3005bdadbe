// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations, one per aggregate, for local
//! development and tests. Thread-safe via `RwLock`-guarded `HashMap`s; no
//! attempt is made to be fast, only correct with respect to the trait
//! contracts in `domain::repository`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::agent::{Agent, AgentId, SponsorId};
use crate::domain::audit::AuditEntry;
use crate::domain::behavior::BehaviorProfile;
use crate::domain::export_ledger::ExportLedgerEntry;
use crate::domain::hitl::{HitlRequest, HitlRequestId};
use crate::domain::permission::{Permission, PermissionId};
use crate::domain::repository::{
    AgentRepository, AuditRepository, BehaviorRepository, ExportLedgerRepository, HitlRepository, PermissionRepository,
    RepositoryError, SecretRepository, SnapshotRepository, WalletRepository,
};
use crate::domain::secret::{SecretId, SecretVaultEntry};
use crate::domain::snapshot::{SnapshotId, StateSnapshot};
use crate::domain::wallet::{Wallet, WalletTransaction};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<AgentId, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agents.write().unwrap().insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().unwrap().get(&id).cloned())
    }

    async fn find_for_sponsor(&self, id: AgentId, sponsor_id: SponsorId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self
            .agents
            .read()
            .unwrap()
            .get(&id)
            .filter(|a| a.sponsor_id == sponsor_id)
            .cloned())
    }

    async fn list_for_sponsor(&self, sponsor_id: SponsorId, limit: i64, offset: i64) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .unwrap()
            .values()
            .filter(|a| a.sponsor_id == sponsor_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(agents.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, RepositoryError> {
        Ok(self.agents.read().unwrap().values().any(|a| a.fingerprint == fingerprint))
    }
}

#[derive(Default)]
pub struct InMemoryPermissionRepository {
    permissions: RwLock<HashMap<PermissionId, Permission>>,
}

impl InMemoryPermissionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionRepository for InMemoryPermissionRepository {
    async fn save(&self, permission: &Permission) -> Result<(), RepositoryError> {
        self.permissions.write().unwrap().insert(permission.id, permission.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PermissionId) -> Result<Option<Permission>, RepositoryError> {
        Ok(self.permissions.read().unwrap().get(&id).cloned())
    }

    async fn find_active(&self, agent_id: AgentId, service_name: &str) -> Result<Option<Permission>, RepositoryError> {
        Ok(self
            .permissions
            .read()
            .unwrap()
            .values()
            .find(|p| p.agent_id == agent_id && p.service_name == service_name && p.active)
            .cloned())
    }

    async fn deactivate(&self, id: PermissionId) -> Result<(), RepositoryError> {
        if let Some(p) = self.permissions.write().unwrap().get_mut(&id) {
            p.active = false;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWalletRepository {
    wallets: RwLock<HashMap<AgentId, Wallet>>,
    transactions: RwLock<Vec<WalletTransaction>>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Wallet>, RepositoryError> {
        Ok(self.wallets.read().unwrap().get(&agent_id).cloned())
    }

    async fn save_with_transaction(&self, wallet: &Wallet, transaction: &WalletTransaction) -> Result<(), RepositoryError> {
        self.wallets.write().unwrap().insert(wallet.agent_id, wallet.clone());
        self.transactions.write().unwrap().push(transaction.clone());
        Ok(())
    }

    async fn save(&self, wallet: &Wallet) -> Result<(), RepositoryError> {
        self.wallets.write().unwrap().insert(wallet.agent_id, wallet.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySecretRepository {
    secrets: RwLock<HashMap<SecretId, SecretVaultEntry>>,
}

impl InMemorySecretRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretRepository for InMemorySecretRepository {
    async fn save(&self, entry: &SecretVaultEntry) -> Result<(), RepositoryError> {
        self.secrets.write().unwrap().insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SecretId) -> Result<Option<SecretVaultEntry>, RepositoryError> {
        Ok(self.secrets.read().unwrap().get(&id).cloned())
    }

    async fn find_by_sponsor_and_service(&self, sponsor_id: SponsorId, service_name: &str) -> Result<Option<SecretVaultEntry>, RepositoryError> {
        Ok(self
            .secrets
            .read()
            .unwrap()
            .values()
            .find(|s| s.sponsor_id == sponsor_id && s.service_name == service_name)
            .cloned())
    }

    async fn find_due_for_rotation(&self) -> Result<Vec<SecretVaultEntry>, RepositoryError> {
        let now = chrono::Utc::now();
        Ok(self
            .secrets
            .read()
            .unwrap()
            .values()
            .filter(|s| s.rotation_due(now))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert_batch(&self, batch: &[AuditEntry]) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().unwrap();
        for entry in batch {
            if entries.iter().any(|e| e.log_hash == entry.log_hash) {
                return Err(RepositoryError::Database(format!("duplicate log_hash {}", entry.log_hash)));
            }
        }
        entries.extend(batch.iter().cloned());
        Ok(())
    }

    async fn latest_hash(&self) -> Result<Option<String>, RepositoryError> {
        Ok(self.entries.read().unwrap().last().map(|e| e.log_hash.clone()))
    }

    async fn find_range_ascending(&self, from_id: Option<i64>, limit: i64) -> Result<Vec<AuditEntry>, RepositoryError> {
        let from_id = from_id.unwrap_or(0);
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.id >= from_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        sponsor_id: SponsorId,
        agent_id: Option<AgentId>,
        service_name: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let mut matches: Vec<AuditEntry> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.sponsor_id == sponsor_id)
            .filter(|e| agent_id.map_or(true, |a| e.agent_id == a))
            .filter(|e| service_name.map_or(true, |s| e.service_name == s))
            .filter(|e| since.map_or(true, |s| e.created_at >= s))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(matches.into_iter().skip(offset.max(0) as usize).take(limit.max(0) as usize).collect())
    }

    async fn count_recent(&self, agent_id: AgentId, hours: i64) -> Result<i64, RepositoryError> {
        let since = chrono::Utc::now() - chrono::Duration::hours(hours);
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.agent_id == agent_id && e.created_at >= since)
            .count() as i64)
    }

    async fn mark_exported(&self, ids: &[i64], exported_at: chrono::DateTime<chrono::Utc>) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().unwrap();
        for entry in entries.iter_mut() {
            if ids.contains(&entry.id) {
                entry.exported_at = Some(exported_at);
            }
        }
        Ok(())
    }

    async fn set_tsa_token(&self, id: i64, token: Vec<u8>) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.tsa_token = Some(token);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHitlRepository {
    requests: RwLock<HashMap<HitlRequestId, HitlRequest>>,
}

impl InMemoryHitlRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HitlRepository for InMemoryHitlRepository {
    async fn save(&self, request: &HitlRequest) -> Result<(), RepositoryError> {
        self.requests.write().unwrap().insert(request.id, request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: HitlRequestId) -> Result<Option<HitlRequest>, RepositoryError> {
        Ok(self.requests.read().unwrap().get(&id).cloned())
    }

    async fn list_pending(&self, sponsor_id: SponsorId) -> Result<Vec<HitlRequest>, RepositoryError> {
        let mut pending: Vec<HitlRequest> = self
            .requests
            .read()
            .unwrap()
            .values()
            .filter(|r| r.sponsor_id == sponsor_id && matches!(r.status, crate::domain::hitl::HitlStatus::Pending))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }
}

#[derive(Default)]
pub struct InMemoryBehaviorRepository {
    profiles: RwLock<HashMap<AgentId, BehaviorProfile>>,
}

impl InMemoryBehaviorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BehaviorRepository for InMemoryBehaviorRepository {
    async fn save(&self, profile: &BehaviorProfile) -> Result<(), RepositoryError> {
        self.profiles.write().unwrap().insert(profile.agent_id, profile.clone());
        Ok(())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<BehaviorProfile>, RepositoryError> {
        Ok(self.profiles.read().unwrap().get(&agent_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySnapshotRepository {
    snapshots: RwLock<HashMap<SnapshotId, StateSnapshot>>,
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RepositoryError> {
        self.snapshots.write().unwrap().insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: SnapshotId) -> Result<Option<StateSnapshot>, RepositoryError> {
        Ok(self.snapshots.read().unwrap().get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryExportLedgerRepository {
    entries: RwLock<Vec<ExportLedgerEntry>>,
}

impl InMemoryExportLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExportLedgerRepository for InMemoryExportLedgerRepository {
    async fn insert(&self, entry: &ExportLedgerEntry) -> Result<(), RepositoryError> {
        self.entries.write().unwrap().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRegistrationSpec;

    #[tokio::test]
    async fn agent_round_trip_and_sponsor_scoping() {
        let repo = InMemoryAgentRepository::new();
        let sponsor = SponsorId::new();
        let agent = Agent::new(sponsor, AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() }, "f".repeat(64));
        repo.save(&agent).await.unwrap();

        assert!(repo.find_for_sponsor(agent.id, SponsorId::new()).await.unwrap().is_none());
        assert!(repo.find_for_sponsor(agent.id, sponsor).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn audit_insert_batch_rejects_duplicate_hash() {
        let repo = InMemoryAuditRepository::new();
        let entry = AuditEntry {
            id: 1,
            log_hash: "a".repeat(64),
            previous_hash: crate::domain::audit::genesis_hash(),
            agent_id: AgentId::new(),
            sponsor_id: SponsorId::new(),
            action_type: "http_call".into(),
            service_name: "openai".into(),
            prompt_excerpt: None,
            model_used: None,
            permission_granted: true,
            policy_evaluation: None,
            cost_usd: rust_decimal::Decimal::ZERO,
            response_code: Some(200),
            client_ip: None,
            duration_ms: Some(12),
            metadata: None,
            created_at: chrono::Utc::now(),
            tsa_token: None,
            exported_at: None,
        };
        repo.insert_batch(&[entry.clone()]).await.unwrap();
        assert!(repo.insert_batch(&[entry]).await.is_err());
    }
}
