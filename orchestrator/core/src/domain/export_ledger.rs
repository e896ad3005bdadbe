// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Export ledger aggregate (`immutable_exports`, §6): one append-only row
//! per forensic export batch (C14, §4.12 step 8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportLedgerId(pub Uuid);

impl ExportLedgerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExportLedgerId {
    fn default() -> Self {
        Self::new()
    }
}

/// One row per `export_batch` call. Column set grounded on
/// `forensic_export.py`'s `immutable_exports` insert: id range, the
/// SHA3-256 `batch_hash` of the restricted-field canonical JSON, the sink
/// path, record count, storage backend tag, optional TSA token, and the
/// caller identity. Never updated or deleted once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLedgerEntry {
    pub id: ExportLedgerId,
    pub from_audit_id: i64,
    pub to_audit_id: i64,
    pub record_count: i64,
    pub batch_hash: String,
    pub storage_backend: String,
    pub storage_path: String,
    pub tsa_token: Option<Vec<u8>>,
    pub exported_by: String,
    pub exported_at: DateTime<Utc>,
}

impl ExportLedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from_audit_id: i64,
        to_audit_id: i64,
        record_count: i64,
        batch_hash: String,
        storage_backend: String,
        storage_path: String,
        tsa_token: Option<Vec<u8>>,
        exported_by: String,
    ) -> Self {
        Self {
            id: ExportLedgerId::new(),
            from_audit_id,
            to_audit_id,
            record_count,
            batch_hash,
            storage_backend,
            storage_path,
            tsa_token,
            exported_by,
            exported_at: Utc::now(),
        }
    }
}
