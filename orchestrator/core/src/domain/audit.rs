// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit entry aggregate (C13 Audit service).
//!
//! Append-only, hash-chained. `log_hash` ties an entry to the one before it;
//! entries are never deleted and only `tsa_token`/`exported_at` may be
//! updated after insertion.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::agent::{AgentId, SponsorId};

/// Genesis hash for the first entry in the chain: 64 hex zeros.
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub log_hash: String,
    pub previous_hash: String,
    pub agent_id: AgentId,
    pub sponsor_id: SponsorId,
    pub action_type: String,
    pub service_name: String,
    /// First 500 chars of any prompt; never the full prompt.
    pub prompt_excerpt: Option<String>,
    pub model_used: Option<String>,
    pub permission_granted: bool,
    /// Opaque, produced/consumed only by external collaborators (§9).
    pub policy_evaluation: Option<serde_json::Value>,
    pub cost_usd: Decimal,
    pub response_code: Option<i32>,
    pub client_ip: Option<String>,
    pub duration_ms: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub tsa_token: Option<Vec<u8>>,
    pub exported_at: Option<DateTime<Utc>>,
}

/// The subset of fields that participate in the chain hash. Field
/// declaration order here is just for readability — `canonical_json` below
/// is what actually determines the byte layout the hash is computed over.
#[derive(Debug, Clone, Serialize)]
pub struct AuditCoreFields {
    pub agent_id: AgentId,
    pub sponsor_id: SponsorId,
    pub action_type: String,
    pub service_name: String,
    pub permission_granted: bool,
    pub cost_usd: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl AuditCoreFields {
    /// The chain-hash input: `self` serialized with object keys sorted
    /// lexicographically, per §4.11 step 5 and §8's chain invariant. Shared
    /// by the audit service (writer) and the forensic exporter's
    /// `deep_verify_chain` (verifier) so the two never compute different
    /// hashes for the same entry.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        canonical_json(self)
    }
}

/// Serializes `value` to JSON with object keys sorted lexicographically.
///
/// A `#[derive(Serialize)]` struct serialized directly (`serde_json::
/// to_string(&value)`) goes through `serialize_struct` and preserves
/// field-declaration order, not alphabetical order. Routing through
/// `serde_json::to_value` first builds a `serde_json::Map`, which in this
/// workspace is `BTreeMap`-backed (the `preserve_order` feature is never
/// enabled) — so the `Value::Object` that comes out, and everything nested
/// inside it, really is key-sorted, and stringifying *that* is canonical.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Construction input for a not-yet-chained entry, assembled by `log(...)`
/// and pushed to the ephemeral buffer before the flush computes its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuditRecord {
    pub agent_id: AgentId,
    pub sponsor_id: SponsorId,
    pub action_type: String,
    pub service_name: String,
    pub prompt_excerpt: Option<String>,
    pub model_used: Option<String>,
    pub permission_granted: bool,
    pub policy_evaluation: Option<serde_json::Value>,
    pub cost_usd: Decimal,
    pub response_code: Option<i32>,
    pub client_ip: Option<String>,
    pub duration_ms: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl PendingAuditRecord {
    /// Truncates any prompt to 500 chars, per the audit service contract.
    pub fn with_prompt(mut self, prompt: Option<&str>) -> Self {
        self.prompt_excerpt = prompt.map(|p| p.chars().take(500).collect());
        self
    }

    pub fn core_fields(&self) -> AuditCoreFields {
        AuditCoreFields {
            agent_id: self.agent_id,
            sponsor_id: self.sponsor_id,
            action_type: self.action_type.clone(),
            service_name: self.service_name.clone(),
            permission_granted: self.permission_granted,
            cost_usd: self.cost_usd,
            timestamp: self.timestamp,
        }
    }
}

/// Result of `verify_chain_integrity`/`deep_verify_chain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entries_checked: usize,
    pub tampered: Vec<TamperedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TamperedEntry {
    pub id: i64,
    pub issue: String,
    pub stored_hash: String,
    pub computed_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_hash_is_64_zeros() {
        assert_eq!(genesis_hash().len(), 64);
        assert!(genesis_hash().chars().all(|c| c == '0'));
    }

    #[test]
    fn canonical_json_sorts_keys_not_declaration_order() {
        let core = AuditCoreFields {
            agent_id: super::super::agent::AgentId::new(),
            sponsor_id: super::super::agent::SponsorId::new(),
            action_type: "proxy.execute".into(),
            service_name: "openai".into(),
            permission_granted: true,
            cost_usd: Decimal::ZERO,
            timestamp: Utc::now(),
        };
        let json = core.canonical_json().unwrap();
        // Declaration order has agent_id before action_type; alphabetical
        // order (and the chain-hash contract) requires the opposite.
        assert!(json.find("\"action_type\"").unwrap() < json.find("\"agent_id\"").unwrap());
    }
}
