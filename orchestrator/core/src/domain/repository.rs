// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Pattern - Storage Backend Abstraction
//!
//! Defines pluggable storage backends for repositories, enabling:
//! - In-memory storage for development/testing
//! - PostgreSQL for production persistence
//!
//! One repository trait per aggregate root, per DDD.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId, SponsorId};
use crate::domain::audit::AuditEntry;
use crate::domain::behavior::BehaviorProfile;
use crate::domain::export_ledger::ExportLedgerEntry;
use crate::domain::hitl::{HitlRequest, HitlRequestId};
use crate::domain::permission::{Permission, PermissionId};
use crate::domain::secret::{SecretId, SecretVaultEntry};
use crate::domain::snapshot::StateSnapshot;
use crate::domain::wallet::{Wallet, WalletId, WalletTransaction};

/// Storage backend enum for pluggable persistence.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn find_for_sponsor(&self, id: AgentId, sponsor_id: SponsorId) -> Result<Option<Agent>, RepositoryError>;
    async fn list_for_sponsor(&self, sponsor_id: SponsorId, limit: i64, offset: i64) -> Result<Vec<Agent>, RepositoryError>;
    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn save(&self, permission: &Permission) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: PermissionId) -> Result<Option<Permission>, RepositoryError>;
    async fn find_active(&self, agent_id: AgentId, service_name: &str) -> Result<Option<Permission>, RepositoryError>;
    async fn deactivate(&self, id: PermissionId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Wallet>, RepositoryError>;
    /// Saves the wallet and appends a ledger row in one transaction. The
    /// caller is expected to have already acquired the wallet's row-level
    /// exclusive lock (implementation detail of the Postgres adapter).
    async fn save_with_transaction(&self, wallet: &Wallet, transaction: &WalletTransaction) -> Result<(), RepositoryError>;
    /// Saves the wallet with no accompanying ledger row (e.g. freeze/unfreeze).
    async fn save(&self, wallet: &Wallet) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    async fn save(&self, entry: &SecretVaultEntry) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: SecretId) -> Result<Option<SecretVaultEntry>, RepositoryError>;
    async fn find_by_sponsor_and_service(&self, sponsor_id: SponsorId, service_name: &str) -> Result<Option<SecretVaultEntry>, RepositoryError>;
    async fn find_due_for_rotation(&self) -> Result<Vec<SecretVaultEntry>, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Inserts a batch of already-chained entries in one transaction.
    async fn insert_batch(&self, entries: &[AuditEntry]) -> Result<(), RepositoryError>;
    async fn latest_hash(&self) -> Result<Option<String>, RepositoryError>;
    async fn find_range_ascending(&self, from_id: Option<i64>, limit: i64) -> Result<Vec<AuditEntry>, RepositoryError>;
    async fn query(
        &self,
        sponsor_id: SponsorId,
        agent_id: Option<AgentId>,
        service_name: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, RepositoryError>;
    async fn count_recent(&self, agent_id: AgentId, hours: i64) -> Result<i64, RepositoryError>;
    async fn mark_exported(&self, ids: &[i64], exported_at: chrono::DateTime<chrono::Utc>) -> Result<(), RepositoryError>;
    async fn set_tsa_token(&self, id: i64, token: Vec<u8>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExportLedgerRepository: Send + Sync {
    /// Inserts an immutable export-batch record (§4.12 step 8). Never
    /// updated or deleted once inserted.
    async fn insert(&self, entry: &ExportLedgerEntry) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait HitlRepository: Send + Sync {
    async fn save(&self, request: &HitlRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: HitlRequestId) -> Result<Option<HitlRequest>, RepositoryError>;
    async fn list_pending(&self, sponsor_id: SponsorId) -> Result<Vec<HitlRequest>, RepositoryError>;
}

#[async_trait]
pub trait BehaviorRepository: Send + Sync {
    async fn save(&self, profile: &BehaviorProfile) -> Result<(), RepositoryError>;
    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<BehaviorProfile>, RepositoryError>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: crate::domain::snapshot::SnapshotId) -> Result<Option<StateSnapshot>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

use crate::infrastructure::repositories::in_memory::InMemoryAgentRepository;
use crate::infrastructure::repositories::postgres_agent::PostgresAgentRepository;

/// Factory for creating the agent repository from a storage backend. The
/// remaining eight aggregates follow the identical pattern in their own
/// infrastructure modules; wiring all nine lives in the daemon bootstrap
/// (`cli::daemon`) rather than repeated here.
pub fn create_agent_repository(backend: &StorageBackend, pool: sqlx::PgPool) -> Arc<dyn AgentRepository> {
    match backend {
        StorageBackend::InMemory => Arc::new(InMemoryAgentRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresAgentRepository::new(pool)),
    }
}
