// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JIT (just-in-time) secret broker (C11).
//!
//! Mints short-lived, unguessable tokens that resolve to a real secret only
//! within the proxy. Real secrets never appear in logs, in the HTTP
//! request/response pair visible to the agent, or in audit payloads —
//! `JitPayload` is never `Debug`-logged with its `real_secret` field intact
//! (see [`JitPayload`]'s manual `Debug` impl).
//!
//! This is the agent-scoped, direct-lookup implementation. An older variant
//! that resolved tokens by scanning every agent's key-space still appears in
//! some deployments but is legacy and intentionally not reimplemented here
//! (§9 open question).

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::infrastructure::crypto::Cipher;
use crate::infrastructure::ephemeral_store::EphemeralStore;

pub const DEFAULT_TTL_SECS: u64 = 120;
const TOKEN_BYTES: usize = 48; // >= 256 bits of entropy

#[derive(Clone, Serialize, Deserialize)]
pub struct JitPayload {
    pub real_secret: String,
    pub agent_id: String,
    pub service: String,
    pub minted_at: DateTime<Utc>,
}

impl std::fmt::Debug for JitPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitPayload")
            .field("real_secret", &"<redacted>")
            .field("agent_id", &self.agent_id)
            .field("service", &self.service)
            .field("minted_at", &self.minted_at)
            .finish()
    }
}

pub struct JitBroker {
    store: EphemeralStore,
    cipher: Cipher,
}

fn token_key(agent_id: AgentId, token: &str) -> String {
    format!("jit:{}:{}", agent_id, token)
}

impl JitBroker {
    pub fn new(store: EphemeralStore, cipher: Cipher) -> Self {
        Self { store, cipher }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decrypts `encrypted_secret`, mints a fresh ephemeral token, and stores
    /// the resolved payload under `jit:<agent>:<token>` with `ttl`.
    pub async fn mint(
        &self,
        agent_id: AgentId,
        service: &str,
        encrypted_secret: &[u8],
        ttl: std::time::Duration,
    ) -> Result<String, JitError> {
        let real_secret = self.cipher.decrypt(encrypted_secret).map_err(JitError::Crypto)?;
        let real_secret = String::from_utf8(real_secret).map_err(|_| JitError::InvalidSecretEncoding)?;

        let token = Self::generate_token();
        let payload = JitPayload { real_secret, agent_id: agent_id.to_string(), service: service.to_string(), minted_at: Utc::now() };
        let serialized = serde_json::to_string(&payload).map_err(|e| JitError::Serialization(e.to_string()))?;

        self.store
            .set_ex(&token_key(agent_id, &token), &serialized, ttl.as_secs())
            .await
            .map_err(|e| JitError::Store(e.to_string()))?;

        Ok(token)
    }

    /// Single lookup; resolves to `None` once expired or revoked.
    pub async fn resolve(&self, agent_id: AgentId, token: &str) -> Result<Option<JitPayload>, JitError> {
        let raw = self.store.get(&token_key(agent_id, token)).await.map_err(|e| JitError::Store(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| JitError::Serialization(e.to_string()))?)),
            None => Ok(None),
        }
    }

    pub async fn revoke(&self, agent_id: AgentId, token: &str) -> Result<(), JitError> {
        self.store.del(&token_key(agent_id, token)).await.map_err(|e| JitError::Store(e.to_string()))
    }

    /// Scans and deletes every live token for `agent_id`. Called by the
    /// circuit breaker on trip.
    pub async fn revoke_all(&self, agent_id: AgentId) -> Result<u64, JitError> {
        let pattern = format!("jit:{}:*", agent_id);
        self.store.scan_and_delete(&pattern).await.map_err(|e| JitError::Store(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("failed to decrypt vault secret: {0}")]
    Crypto(crate::infrastructure::crypto::CryptoError),
    #[error("decrypted secret is not valid UTF-8")]
    InvalidSecretEncoding,
    #[error("ephemeral store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_impl_never_prints_real_secret() {
        let payload = JitPayload {
            real_secret: "sk-super-secret-value".into(),
            agent_id: "agent-1".into(),
            service: "openai".into(),
            minted_at: Utc::now(),
        };
        let debug_str = format!("{:?}", payload);
        assert!(!debug_str.contains("sk-super-secret-value"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn generated_tokens_are_unique_and_unguessable() {
        let a = JitBroker::generate_token();
        let b = JitBroker::generate_token();
        assert_ne!(a, b);
        // 48 raw bytes -> 64 base64url chars without padding.
        assert_eq!(a.len(), 64);
    }
}
