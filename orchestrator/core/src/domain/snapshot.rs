// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State snapshot aggregate.
//!
//! Records enough to undo a mutating pipeline action (POST/PUT/PATCH/DELETE).
//! Written best-effort at the end of the pipeline (step 19); a failure here
//! is non-fatal to the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub id: SnapshotId,
    /// The audit entry this snapshot was produced alongside.
    pub audit_id: i64,
    /// Opaque: `{method, url, status}` for the pipeline's current use.
    pub snapshot_data: serde_json::Value,
    /// Opaque rollback instructions, interpreted only by an external
    /// collaborator that performs the actual rollback.
    pub rollback_instructions: serde_json::Value,
    pub rolled_back: bool,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(audit_id: i64, snapshot_data: serde_json::Value, rollback_instructions: serde_json::Value) -> Self {
        Self {
            id: SnapshotId::new(),
            audit_id,
            snapshot_data,
            rollback_instructions,
            rolled_back: false,
            rolled_back_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn mark_rolled_back(&mut self, now: DateTime<Utc>) {
        self.rolled_back = true;
        self.rolled_back_at = Some(now);
    }
}
