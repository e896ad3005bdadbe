// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `AuditRepository`, against the append-only `audit_logs`
//! table. DELETE is forbidden and UPDATE is restricted to `tsa_token` and
//! `exported_at` at the schema level (migration, not enforced here).

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{AgentId, SponsorId};
use crate::domain::audit::AuditEntry;
use crate::domain::repository::{AuditRepository, RepositoryError};

pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> AuditEntry {
        AuditEntry {
            id: row.get("id"),
            log_hash: row.get("log_hash"),
            previous_hash: row.get("previous_hash"),
            agent_id: AgentId(row.get("agent_id")),
            sponsor_id: SponsorId(row.get("sponsor_id")),
            action_type: row.get("action_type"),
            service_name: row.get("service_name"),
            prompt_excerpt: row.get("prompt_excerpt"),
            model_used: row.get("model_used"),
            permission_granted: row.get("permission_granted"),
            policy_evaluation: row.get("policy_evaluation"),
            cost_usd: row.get("cost_usd"),
            response_code: row.get("response_code"),
            client_ip: row.get("client_ip"),
            duration_ms: row.get("duration_ms"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            tsa_token: row.get("tsa_token"),
            exported_at: row.get("exported_at"),
        }
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn insert_batch(&self, entries: &[AuditEntry]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO audit_logs (
                    log_hash, previous_hash, agent_id, sponsor_id, action_type, service_name,
                    prompt_excerpt, model_used, permission_granted, policy_evaluation, cost_usd,
                    response_code, client_ip, duration_ms, metadata, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(&entry.log_hash)
            .bind(&entry.previous_hash)
            .bind(entry.agent_id.0)
            .bind(entry.sponsor_id.0)
            .bind(&entry.action_type)
            .bind(&entry.service_name)
            .bind(&entry.prompt_excerpt)
            .bind(&entry.model_used)
            .bind(entry.permission_granted)
            .bind(&entry.policy_evaluation)
            .bind(entry.cost_usd)
            .bind(entry.response_code)
            .bind(&entry.client_ip)
            .bind(entry.duration_ms)
            .bind(&entry.metadata)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            // A unique-constraint violation on log_hash means a retried flush
            // re-inserted entries whose first commit already succeeded; the
            // whole batch fails, which is the correct at-least-once behavior.
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn latest_hash(&self) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT log_hash FROM audit_logs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(row.map(|r| r.get("log_hash")))
    }

    async fn find_range_ascending(&self, from_id: Option<i64>, limit: i64) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, log_hash, previous_hash, agent_id, sponsor_id, action_type, service_name,
                   prompt_excerpt, model_used, permission_granted, policy_evaluation, cost_usd,
                   response_code, client_ip, duration_ms, metadata, created_at, tsa_token, exported_at
            FROM audit_logs
            WHERE id >= $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(from_id.unwrap_or(0))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_entry).collect())
    }

    async fn query(
        &self,
        sponsor_id: SponsorId,
        agent_id: Option<AgentId>,
        service_name: Option<&str>,
        since: Option<chrono::DateTime<chrono::Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, log_hash, previous_hash, agent_id, sponsor_id, action_type, service_name,
                   prompt_excerpt, model_used, permission_granted, policy_evaluation, cost_usd,
                   response_code, client_ip, duration_ms, metadata, created_at, tsa_token, exported_at
            FROM audit_logs
            WHERE sponsor_id = $1
              AND ($2::uuid IS NULL OR agent_id = $2)
              AND ($3::text IS NULL OR service_name = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
            ORDER BY id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(sponsor_id.0)
        .bind(agent_id.map(|a| a.0))
        .bind(service_name)
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_entry).collect())
    }

    async fn count_recent(&self, agent_id: AgentId, hours: i64) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM audit_logs WHERE agent_id = $1 AND created_at >= NOW() - ($2 || ' hours')::interval",
        )
        .bind(agent_id.0)
        .bind(hours.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(row.get("n"))
    }

    async fn mark_exported(&self, ids: &[i64], exported_at: chrono::DateTime<chrono::Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE audit_logs SET exported_at = $1 WHERE id = ANY($2)")
            .bind(exported_at)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn set_tsa_token(&self, id: i64, token: Vec<u8>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE audit_logs SET tsa_token = $1 WHERE id = $2")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}
