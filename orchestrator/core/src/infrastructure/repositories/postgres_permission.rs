// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `PermissionRepository`, against `agent_permissions`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::permission::{Permission, PermissionId, TimeWindow};
use crate::domain::repository::{PermissionRepository, RepositoryError};

pub struct PostgresPermissionRepository {
    pool: PgPool,
}

impl PostgresPermissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_permission(row: &sqlx::postgres::PgRow) -> Result<Permission, RepositoryError> {
        let window_start: Option<chrono::NaiveTime> = row.get("window_start");
        let window_end: Option<chrono::NaiveTime> = row.get("window_end");
        let time_window = match (window_start, window_end) {
            (Some(start), Some(end)) => Some(TimeWindow { start, end }),
            _ => None,
        };
        let allowed_actions_json: serde_json::Value = row.get("allowed_actions");
        let allowed_actions: Vec<String> = serde_json::from_value(allowed_actions_json)?;

        Ok(Permission {
            id: PermissionId(row.get("id")),
            agent_id: AgentId(row.get("agent_id")),
            service_name: row.get("service_name"),
            allowed_actions,
            max_requests_per_hour: row.get::<i32, _>("max_requests_per_hour") as u32,
            time_window,
            per_request_cap: row.get("per_request_cap"),
            requires_hitl: row.get("requires_hitl"),
            policy_override: row.get("policy_override"),
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl PermissionRepository for PostgresPermissionRepository {
    async fn save(&self, permission: &Permission) -> Result<(), RepositoryError> {
        let allowed_actions_json = serde_json::to_value(&permission.allowed_actions)?;
        sqlx::query(
            r#"
            INSERT INTO agent_permissions (
                id, agent_id, service_name, allowed_actions, max_requests_per_hour,
                window_start, window_end, per_request_cap, requires_hitl,
                policy_override, active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                allowed_actions = EXCLUDED.allowed_actions,
                max_requests_per_hour = EXCLUDED.max_requests_per_hour,
                window_start = EXCLUDED.window_start,
                window_end = EXCLUDED.window_end,
                per_request_cap = EXCLUDED.per_request_cap,
                requires_hitl = EXCLUDED.requires_hitl,
                policy_override = EXCLUDED.policy_override,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(permission.id.0)
        .bind(permission.agent_id.0)
        .bind(&permission.service_name)
        .bind(allowed_actions_json)
        .bind(permission.max_requests_per_hour as i32)
        .bind(permission.time_window.map(|w| w.start))
        .bind(permission.time_window.map(|w| w.end))
        .bind(permission.per_request_cap)
        .bind(permission.requires_hitl)
        .bind(&permission.policy_override)
        .bind(permission.active)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: PermissionId) -> Result<Option<Permission>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, service_name, allowed_actions, max_requests_per_hour,
                   window_start, window_end, per_request_cap, requires_hitl,
                   policy_override, active, created_at, updated_at
            FROM agent_permissions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_permission).transpose()
    }

    async fn find_active(&self, agent_id: AgentId, service_name: &str) -> Result<Option<Permission>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, service_name, allowed_actions, max_requests_per_hour,
                   window_start, window_end, per_request_cap, requires_hitl,
                   policy_override, active, created_at, updated_at
            FROM agent_permissions
            WHERE agent_id = $1 AND service_name = $2 AND active = true
            "#,
        )
        .bind(agent_id.0)
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_permission).transpose()
    }

    async fn deactivate(&self, id: PermissionId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agent_permissions SET active = false, updated_at = NOW() WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}
