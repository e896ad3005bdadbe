// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Secret vault entry (backing store for C11 JIT secret broker).
//!
//! Unique per `(sponsor, service_name)`. The plaintext secret never leaves
//! this module except through the JIT broker's `mint`/`resolve` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::SponsorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretId(pub Uuid);

impl SecretId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SecretId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    BearerToken,
    BasicAuth,
    Custom,
}

/// A vault entry holding an AEAD-encrypted secret. `ciphertext` is opaque to
/// this type; encryption/decryption is C3's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVaultEntry {
    pub id: SecretId,
    pub sponsor_id: SponsorId,
    pub service_name: String,
    pub ciphertext: Vec<u8>,
    pub secret_type: SecretType,
    /// 0 means no rotation.
    pub rotation_interval_hours: u32,
    pub last_rotated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretVaultEntry {
    pub fn new(
        sponsor_id: SponsorId,
        service_name: String,
        ciphertext: Vec<u8>,
        secret_type: SecretType,
        rotation_interval_hours: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SecretId::new(),
            sponsor_id,
            service_name,
            ciphertext,
            secret_type,
            rotation_interval_hours,
            last_rotated: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this entry is due for rotation as of `now`.
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        if self.rotation_interval_hours == 0 {
            return false;
        }
        let deadline = self.last_rotated + chrono::Duration::hours(self.rotation_interval_hours as i64);
        now >= deadline
    }

    pub fn mark_rotated(&mut self, ciphertext: Vec<u8>, now: DateTime<Utc>) {
        self.ciphertext = ciphertext;
        self.last_rotated = now;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_never_due() {
        let entry = SecretVaultEntry::new(SponsorId::new(), "openai".into(), vec![1, 2, 3], SecretType::ApiKey, 0);
        assert!(!entry.rotation_due(Utc::now() + chrono::Duration::days(3650)));
    }

    #[test]
    fn rotation_due_past_deadline() {
        let mut entry = SecretVaultEntry::new(SponsorId::new(), "openai".into(), vec![1, 2, 3], SecretType::ApiKey, 24);
        entry.last_rotated = Utc::now() - chrono::Duration::hours(25);
        assert!(entry.rotation_due(Utc::now()));
    }
}
