// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit service (C13): hash-chained, append-only logging with a
//! crash-safe buffered flush (§4.11).
//!
//! `log(...)` never blocks on Postgres: it pushes the pending record onto a
//! Redis list and returns. A periodic (or manually triggered) `flush` moves
//! entries from `buffer` to `processing` with an atomic `LMOVE`, chains and
//! batch-commits them, and only then drains `processing` — so a crash
//! between the move and the commit leaves the entries sitting in
//! `processing` rather than losing them, and a crash after commit but
//! before the drain simply re-flushes the same (now duplicate) entries,
//! which the repository's unique constraint on `log_hash` makes safely
//! idempotent.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::audit::{AuditCoreFields, AuditEntry, PendingAuditRecord};
use crate::domain::repository::{AuditRepository, RepositoryError};
use crate::infrastructure::crypto::{chain_hash, genesis_hash};
use crate::infrastructure::ephemeral_store::EphemeralStore;

const BUFFER_KEY: &str = "audit:buffer";
const PROCESSING_KEY: &str = "audit:processing";
const FLUSH_LOCK_KEY: &str = "audit:flush";
const FLUSH_LOCK_TTL_SECS: u64 = 15;
/// Upper bound on how many entries one `flush` call moves and commits
/// (§4.11 step 2).
const MAX_BATCH: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum AuditServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("ephemeral store error: {0}")]
    Store(String),
}

pub struct AuditService {
    store: EphemeralStore,
    repository: Arc<dyn AuditRepository>,
}

impl AuditService {
    pub fn new(store: EphemeralStore, repository: Arc<dyn AuditRepository>) -> Self {
        Self { store, repository }
    }

    /// Appends `record` to the buffer. Never fails the caller's pipeline
    /// step on a store error — logged and swallowed, per §7's "audit-push
    /// failures logged-and-continued" contract. The record is lost only if
    /// both this push and every retry fail, which is an accepted tradeoff
    /// for keeping the pipeline non-blocking on the audit path.
    pub async fn log(&self, record: PendingAuditRecord) {
        match serde_json::to_string(&record) {
            Ok(serialized) => {
                if let Err(err) = self.store.rpush(BUFFER_KEY, &serialized).await {
                    tracing::error!(error = %err, "failed to push audit record to buffer, record dropped");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize audit record, record dropped");
            }
        }
    }

    /// Moves up to `MAX_BATCH` entries from `buffer` to `processing`,
    /// chains and commits them together with anything already sitting in
    /// `processing` (leftover from a flush that crashed between the move
    /// and the commit), then trims the committed prefix off `processing`.
    /// Returns the number of entries committed.
    ///
    /// Acquires the distributed `audit:flush` lock first (§4.11 step 1): a
    /// `SET NX EX 15` that a concurrent flush (another proxy instance, or a
    /// manually triggered flush racing the scheduler's tick) retries once
    /// before giving up and returning 0, so across-process flush ordering
    /// is total per §5.
    pub async fn flush(&self) -> Result<usize, AuditServiceError> {
        let lock_token = uuid::Uuid::new_v4().to_string();
        let mut acquired = self
            .store
            .set_nx_ex(FLUSH_LOCK_KEY, &lock_token, FLUSH_LOCK_TTL_SECS)
            .await
            .map_err(|e| AuditServiceError::Store(e.to_string()))?;
        if !acquired {
            acquired = self
                .store
                .set_nx_ex(FLUSH_LOCK_KEY, &lock_token, FLUSH_LOCK_TTL_SECS)
                .await
                .map_err(|e| AuditServiceError::Store(e.to_string()))?;
        }
        if !acquired {
            return Ok(0);
        }
        let result = self.flush_locked().await;
        if let Err(err) = self.store.compare_and_delete(FLUSH_LOCK_KEY, &lock_token).await {
            tracing::warn!(error = %err, "failed to release audit flush lock");
        }
        result
    }

    async fn flush_locked(&self) -> Result<usize, AuditServiceError> {
        let leftover = self.store.lrange(PROCESSING_KEY, 0, -1).await.map_err(|e| AuditServiceError::Store(e.to_string()))?;
        let mut pending = leftover;

        while pending.len() < MAX_BATCH {
            match self.store.lmove_one(BUFFER_KEY, PROCESSING_KEY).await {
                Ok(Some(raw)) => pending.push(raw),
                Ok(None) => break,
                Err(err) => return Err(AuditServiceError::Store(err.to_string())),
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        let records: Vec<PendingAuditRecord> = pending
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::error!(error = %err, "dropping malformed audit record found in processing list");
                    None
                }
            })
            .collect();

        let mut previous_hash = self.repository.latest_hash().await?.unwrap_or_else(genesis_hash);
        let mut entries = Vec::with_capacity(records.len());
        for record in &records {
            let core = record.core_fields();
            let payload_str = canonical_json(&core)?;
            let log_hash = chain_hash(&payload_str, &previous_hash);
            entries.push(AuditEntry {
                id: 0,
                log_hash: log_hash.clone(),
                previous_hash: previous_hash.clone(),
                agent_id: record.agent_id,
                sponsor_id: record.sponsor_id,
                action_type: record.action_type.clone(),
                service_name: record.service_name.clone(),
                prompt_excerpt: record.prompt_excerpt.clone(),
                model_used: record.model_used.clone(),
                permission_granted: record.permission_granted,
                policy_evaluation: record.policy_evaluation.clone(),
                cost_usd: record.cost_usd,
                response_code: record.response_code,
                client_ip: record.client_ip.clone(),
                duration_ms: record.duration_ms,
                metadata: record.metadata.clone(),
                created_at: record.timestamp,
                tsa_token: None,
                exported_at: None,
            });
            previous_hash = log_hash;
        }

        self.repository.insert_batch(&entries).await?;

        // Commit succeeded: trim the committed prefix off `processing`. A
        // crash between the line above and this one just means the next
        // flush re-commits the same entries, which `insert_batch`'s
        // unique constraint on `log_hash` makes idempotent.
        if let Err(err) = self.store.ltrim(PROCESSING_KEY, pending.len() as isize, -1).await {
            tracing::warn!(error = %err, "failed to trim processing list after commit");
        }

        Ok(entries.len())
    }

    pub async fn count_recent(&self, agent_id: crate::domain::agent::AgentId, hours: i64) -> Result<i64, AuditServiceError> {
        Ok(self.repository.count_recent(agent_id, hours).await?)
    }
}

/// Delegates to `AuditCoreFields::canonical_json` so this writer and the
/// forensic exporter's `deep_verify_chain` verifier always hash the same
/// bytes for the same entry.
fn canonical_json(core: &AuditCoreFields) -> Result<String, AuditServiceError> {
    core.canonical_json().map_err(|e| AuditServiceError::Store(format!("failed to serialize audit core fields: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_deterministic() {
        let core = AuditCoreFields {
            agent_id: crate::domain::agent::AgentId::new(),
            sponsor_id: crate::domain::agent::SponsorId::new(),
            action_type: "proxy.execute".into(),
            service_name: "openai".into(),
            permission_granted: true,
            cost_usd: rust_decimal::Decimal::ZERO,
            timestamp: Utc::now(),
        };
        let a = canonical_json(&core).unwrap();
        let b = canonical_json(&core).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_json_keys_are_sorted() {
        let core = AuditCoreFields {
            agent_id: crate::domain::agent::AgentId::new(),
            sponsor_id: crate::domain::agent::SponsorId::new(),
            action_type: "proxy.execute".into(),
            service_name: "openai".into(),
            permission_granted: true,
            cost_usd: rust_decimal::Decimal::ZERO,
            timestamp: Utc::now(),
        };
        let json = canonical_json(&core).unwrap();
        assert!(json.find("\"action_type\"").unwrap() < json.find("\"agent_id\"").unwrap());
    }
}
