// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Permission aggregate (C6 Permission cache, backing store for C4/C16).
//!
//! At most one active permission exists per `(agent, service)` tuple; this
//! invariant is enforced by the repository's upsert, not by this type.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionId(pub Uuid);

impl PermissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PermissionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Time-of-day window, inclusive, in the proxy's configured timezone (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t <= self.end
        } else {
            // wraps midnight
            t >= self.start || t <= self.end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub agent_id: AgentId,
    pub service_name: String,
    pub allowed_actions: Vec<String>,
    pub max_requests_per_hour: u32,
    pub time_window: Option<TimeWindow>,
    pub per_request_cap: rust_decimal::Decimal,
    pub requires_hitl: bool,
    /// Opaque, service-specific policy override. Never parsed by the core.
    pub policy_override: Option<serde_json::Value>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn allows_action(&self, action: &str) -> bool {
        self.active && self.allowed_actions.iter().any(|a| a == action)
    }

    /// The subset of fields consumed by the policy engine and the cache —
    /// never raw secrets, never the full row.
    pub fn cache_view(&self) -> PermissionCacheEntry {
        PermissionCacheEntry {
            permission_id: self.id,
            agent_id: self.agent_id,
            service_name: self.service_name.clone(),
            allowed_actions: self.allowed_actions.clone(),
            max_requests_per_hour: self.max_requests_per_hour,
            time_window: self.time_window,
            per_request_cap: self.per_request_cap,
            requires_hitl: self.requires_hitl,
            active: self.active,
        }
    }
}

/// What C6 actually caches: a narrowed, serializable view of [`Permission`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionCacheEntry {
    pub permission_id: PermissionId,
    pub agent_id: AgentId,
    pub service_name: String,
    pub allowed_actions: Vec<String>,
    pub max_requests_per_hour: u32,
    pub time_window: Option<TimeWindow>,
    pub per_request_cap: rust_decimal::Decimal,
    pub requires_hitl: bool,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_handles_midnight_wrap() {
        let window = TimeWindow {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
        };
        assert!(window.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }
}
