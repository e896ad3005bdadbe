// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Forensic exporter (C14): batched, write-once export of the audit chain to
//! an external sink, with a deep chain-integrity re-verification pass
//! before anything is written and an optional RFC 3161 timestamp token
//! attached to each exported batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha3::{Digest, Sha3_256};

use crate::domain::agent::{AgentId, SponsorId};
use crate::domain::audit::{self, AuditEntry, ChainVerification, TamperedEntry};
use crate::domain::export_ledger::ExportLedgerEntry;
use crate::domain::repository::{AuditRepository, ExportLedgerRepository, RepositoryError};
use crate::infrastructure::crypto::{chain_hash, genesis_hash};
use crate::infrastructure::ephemeral_store::EphemeralStore;
use crate::infrastructure::export_sink::{ExportSink, ExportSinkError};
use crate::infrastructure::tsa_client::{TsaClient, TsaError};

const CURSOR_KEY: &str = "export:cursor";

#[derive(Debug, thiserror::Error)]
pub enum ForensicExportError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Sink(#[from] ExportSinkError),
    #[error(transparent)]
    Tsa(#[from] TsaError),
    #[error("ephemeral store error: {0}")]
    Store(String),
    #[error("chain integrity check failed before export: {0:?}")]
    ChainTampered(Vec<TamperedEntry>),
    #[error("failed to serialize export batch: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct ExportBatchResult {
    pub exported: usize,
    pub path: Option<String>,
    pub tsa_attached: bool,
    pub batch_hash: Option<String>,
}

/// The restricted field subset a batch's canonical JSON (and therefore its
/// `batch_hash`) is computed over (§4.12 step 3). Deliberately excludes
/// everything else `AuditEntry` carries — `prompt_excerpt`, `model_used`,
/// `policy_evaluation`, `metadata`, `tsa_token`, `exported_at` never
/// participate in the export hash.
#[derive(Serialize)]
struct ExportEntryFields<'a> {
    id: i64,
    log_hash: &'a str,
    previous_hash: &'a str,
    agent_id: AgentId,
    sponsor_id: SponsorId,
    action_type: &'a str,
    service_name: &'a str,
    permission_granted: bool,
    cost_usd: Decimal,
    response_code: Option<i32>,
    ip_address: Option<&'a str>,
    duration_ms: Option<i64>,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a AuditEntry> for ExportEntryFields<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        Self {
            id: entry.id,
            log_hash: &entry.log_hash,
            previous_hash: &entry.previous_hash,
            agent_id: entry.agent_id,
            sponsor_id: entry.sponsor_id,
            action_type: &entry.action_type,
            service_name: &entry.service_name,
            permission_granted: entry.permission_granted,
            cost_usd: entry.cost_usd,
            response_code: entry.response_code,
            ip_address: entry.client_ip.as_deref(),
            duration_ms: entry.duration_ms,
            timestamp: entry.created_at,
        }
    }
}

/// Canonical (sorted-key) JSON bytes of the restricted field subset, and
/// the SHA3-256 `batch_hash` over those bytes — both hex-encoded and raw
/// (§4.12 steps 3-4).
fn canonical_batch(entries: &[AuditEntry]) -> Result<(Vec<u8>, String, Vec<u8>), ForensicExportError> {
    let fields: Vec<ExportEntryFields> = entries.iter().map(ExportEntryFields::from).collect();
    let canonical = audit::canonical_json(&fields)?;
    let canonical_bytes = canonical.into_bytes();

    let mut hasher = Sha3_256::new();
    hasher.update(&canonical_bytes);
    let digest = hasher.finalize();

    Ok((canonical_bytes, hex::encode(digest), digest.to_vec()))
}

pub struct ForensicExporter {
    repository: Arc<dyn AuditRepository>,
    export_ledger: Arc<dyn ExportLedgerRepository>,
    store: EphemeralStore,
    sink: ExportSink,
    sink_backend: &'static str,
    tsa: Option<TsaClient>,
}

impl ForensicExporter {
    pub fn new(
        repository: Arc<dyn AuditRepository>,
        export_ledger: Arc<dyn ExportLedgerRepository>,
        store: EphemeralStore,
        sink: ExportSink,
        sink_backend: &'static str,
        tsa: Option<TsaClient>,
    ) -> Self {
        Self { repository, export_ledger, store, sink, sink_backend, tsa }
    }

    /// Re-derives every `log_hash` in `entries` from its stored
    /// `previous_hash` and core fields, and checks that each entry's
    /// `previous_hash` matches the prior entry's `log_hash` (or the genesis
    /// hash, for the very first entry in the chain).
    pub fn deep_verify_chain(entries: &[AuditEntry], is_chain_start: bool) -> ChainVerification {
        let mut tampered = Vec::new();
        let mut expected_previous = if is_chain_start { Some(genesis_hash()) } else { None };

        for entry in entries {
            if let Some(expected) = &expected_previous {
                if &entry.previous_hash != expected {
                    tampered.push(TamperedEntry {
                        id: entry.id,
                        issue: "previous_hash does not match the prior entry's log_hash".into(),
                        stored_hash: entry.previous_hash.clone(),
                        computed_hash: expected.clone(),
                    });
                }
            }

            let core = crate::domain::audit::AuditCoreFields {
                agent_id: entry.agent_id,
                sponsor_id: entry.sponsor_id,
                action_type: entry.action_type.clone(),
                service_name: entry.service_name.clone(),
                permission_granted: entry.permission_granted,
                cost_usd: entry.cost_usd,
                timestamp: entry.created_at,
            };
            let payload_str = core.canonical_json().unwrap_or_default();
            let computed = chain_hash(&payload_str, &entry.previous_hash);
            if computed != entry.log_hash {
                tampered.push(TamperedEntry {
                    id: entry.id,
                    issue: "log_hash does not match its recomputed value".into(),
                    stored_hash: entry.log_hash.clone(),
                    computed_hash: computed.clone(),
                });
            }

            expected_previous = Some(entry.log_hash.clone());
        }

        ChainVerification { valid: tampered.is_empty(), entries_checked: entries.len(), tampered }
    }

    async fn cursor(&self) -> Result<i64, ForensicExportError> {
        Ok(self
            .store
            .get(CURSOR_KEY)
            .await
            .map_err(|e| ForensicExportError::Store(e.to_string()))?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    async fn advance_cursor(&self, id: i64) -> Result<(), ForensicExportError> {
        self.store.set(CURSOR_KEY, &id.to_string()).await.map_err(|e| ForensicExportError::Store(e.to_string()))
    }

    /// Exports up to `batch_size` not-yet-exported entries in ascending id
    /// order. Refuses to write anything if the batch (together with the
    /// knowledge of whether it opens the chain) fails deep verification
    /// (§4.12 steps 1-2).
    pub async fn export_batch(&self, batch_size: i64, exported_by: &str) -> Result<ExportBatchResult, ForensicExportError> {
        let cursor = self.cursor().await?;
        let entries = self.repository.find_range_ascending(Some(cursor + 1), batch_size).await?;
        if entries.is_empty() {
            return Ok(ExportBatchResult { exported: 0, path: None, tsa_attached: false, batch_hash: None });
        }

        let verification = Self::deep_verify_chain(&entries, cursor == 0);
        if !verification.valid {
            return Err(ForensicExportError::ChainTampered(verification.tampered));
        }

        let first_id = entries.first().expect("checked non-empty above").id;
        let last_id = entries.last().expect("checked non-empty above").id;

        // §4.12 steps 3-4: canonical JSON over the restricted field subset,
        // then its SHA3-256 digest. Both the upload body and the TSA
        // request derive from this, never from the full `AuditEntry` rows.
        let (canonical_bytes, batch_hash_hex, batch_hash_raw) = canonical_batch(&entries)?;
        let path = format!("audit-export-{:012}-{:012}.json", first_id, last_id);
        self.sink.put(&path, canonical_bytes).await?;

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let now = Utc::now();

        let mut tsa_token = None;
        let tsa_attached = if let Some(tsa) = &self.tsa {
            // `tsa.timestamp` hashes its input with SHA-256 before sending
            // it to the TSA, so passing the raw batch_hash digest here is
            // what produces a timestamp over SHA-256(batch_hash) (§4.12
            // step 5).
            let token = tsa.timestamp(&batch_hash_raw).await?;
            for id in &ids {
                self.repository.set_tsa_token(*id, token.clone()).await?;
            }
            tsa_token = Some(token);
            true
        } else {
            false
        };

        self.repository.mark_exported(&ids, now).await?;

        let ledger_entry = ExportLedgerEntry::new(
            first_id,
            last_id,
            entries.len() as i64,
            batch_hash_hex.clone(),
            self.sink_backend.to_string(),
            path.clone(),
            tsa_token,
            exported_by.to_string(),
        );
        self.export_ledger.insert(&ledger_entry).await?;

        self.advance_cursor(last_id).await?;

        Ok(ExportBatchResult { exported: entries.len(), path: Some(path), tsa_attached, batch_hash: Some(batch_hash_hex) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, SponsorId};
    use rust_decimal::Decimal;

    fn entry(id: i64, previous_hash: String, agent_id: AgentId, sponsor_id: SponsorId, cost: Decimal, created_at: chrono::DateTime<Utc>) -> AuditEntry {
        let core = crate::domain::audit::AuditCoreFields {
            agent_id,
            sponsor_id,
            action_type: "proxy.execute".into(),
            service_name: "openai".into(),
            permission_granted: true,
            cost_usd: cost,
            timestamp: created_at,
        };
        let payload_str = core.canonical_json().unwrap();
        let log_hash = chain_hash(&payload_str, &previous_hash);
        AuditEntry {
            id,
            log_hash,
            previous_hash,
            agent_id,
            sponsor_id,
            action_type: "proxy.execute".into(),
            service_name: "openai".into(),
            prompt_excerpt: None,
            model_used: None,
            permission_granted: true,
            policy_evaluation: None,
            cost_usd: cost,
            response_code: Some(200),
            client_ip: None,
            duration_ms: Some(10),
            metadata: None,
            created_at,
            tsa_token: None,
            exported_at: None,
        }
    }

    #[test]
    fn valid_chain_from_genesis_passes() {
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let now = Utc::now();
        let e1 = entry(1, genesis_hash(), agent_id, sponsor_id, Decimal::ZERO, now);
        let e2 = entry(2, e1.log_hash.clone(), agent_id, sponsor_id, Decimal::ZERO, now);
        let verification = ForensicExporter::deep_verify_chain(&[e1, e2], true);
        assert!(verification.valid);
        assert_eq!(verification.entries_checked, 2);
    }

    #[test]
    fn tampered_cost_is_detected() {
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let now = Utc::now();
        let e1 = entry(1, genesis_hash(), agent_id, sponsor_id, Decimal::ZERO, now);
        let mut e2 = entry(2, e1.log_hash.clone(), agent_id, sponsor_id, Decimal::ZERO, now);
        e2.cost_usd = Decimal::from(999); // mutated after hashing
        let verification = ForensicExporter::deep_verify_chain(&[e1, e2], true);
        assert!(!verification.valid);
        assert_eq!(verification.tampered[0].id, 2);
    }

    #[test]
    fn canonical_batch_hashes_restricted_fields_with_sorted_keys() {
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let now = Utc::now();
        let e1 = entry(1, genesis_hash(), agent_id, sponsor_id, Decimal::ZERO, now);
        let (canonical_bytes, hash_a, raw_a) = canonical_batch(std::slice::from_ref(&e1)).unwrap();
        let (_, hash_b, raw_b) = canonical_batch(&[e1]).unwrap();
        assert_eq!(hash_a, hash_b);
        assert_eq!(raw_a, raw_b);
        assert_eq!(hash_a.len(), 64); // hex-encoded SHA3-256

        let canonical = String::from_utf8(canonical_bytes).unwrap();
        assert!(canonical.find("\"action_type\"").unwrap() < canonical.find("\"agent_id\"").unwrap());
        assert!(!canonical.contains("prompt_excerpt"));
        assert!(!canonical.contains("tsa_token"));
    }

    #[test]
    fn broken_link_between_entries_is_detected() {
        let agent_id = AgentId::new();
        let sponsor_id = SponsorId::new();
        let now = Utc::now();
        let e1 = entry(1, genesis_hash(), agent_id, sponsor_id, Decimal::ZERO, now);
        let e2 = entry(2, "f".repeat(64), agent_id, sponsor_id, Decimal::ZERO, now); // wrong previous_hash
        let verification = ForensicExporter::deep_verify_chain(&[e1, e2], true);
        assert!(!verification.valid);
    }
}
