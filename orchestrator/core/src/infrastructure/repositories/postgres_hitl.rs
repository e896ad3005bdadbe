// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `HitlRepository`, against `hitl_requests`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{AgentId, SponsorId};
use crate::domain::hitl::{HitlRequest, HitlRequestId, HitlStatus};
use crate::domain::repository::{HitlRepository, RepositoryError};

pub struct PostgresHitlRepository {
    pool: PgPool,
}

impl PostgresHitlRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &sqlx::postgres::PgRow) -> Result<HitlRequest, RepositoryError> {
        let status_str: String = row.get("status");
        let status = match status_str.as_str() {
            "pending" => HitlStatus::Pending,
            "approved" => HitlStatus::Approved,
            "rejected" => HitlStatus::Rejected,
            "expired" => HitlStatus::Expired,
            other => return Err(RepositoryError::Database(format!("unknown hitl status: {other}"))),
        };
        Ok(HitlRequest {
            id: HitlRequestId(row.get("id")),
            agent_id: AgentId(row.get("agent_id")),
            sponsor_id: SponsorId(row.get("sponsor_id")),
            action_description: row.get("action_description"),
            payload: row.get("payload"),
            estimated_cost: row.get("estimated_cost"),
            status,
            decider: row.get("decider"),
            decision_note: row.get("decision_note"),
            created_at: row.get("created_at"),
            decided_at: row.get("decided_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

#[async_trait]
impl HitlRepository for PostgresHitlRepository {
    async fn save(&self, request: &HitlRequest) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO hitl_requests (
                id, agent_id, sponsor_id, action_description, payload, estimated_cost,
                status, decider, decision_note, created_at, decided_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                decider = EXCLUDED.decider,
                decision_note = EXCLUDED.decision_note,
                decided_at = EXCLUDED.decided_at
            "#,
        )
        .bind(request.id.0)
        .bind(request.agent_id.0)
        .bind(request.sponsor_id.0)
        .bind(&request.action_description)
        .bind(&request.payload)
        .bind(request.estimated_cost)
        .bind(hitl_status_str(request.status))
        .bind(&request.decider)
        .bind(&request.decision_note)
        .bind(request.created_at)
        .bind(request.decided_at)
        .bind(request.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: HitlRequestId) -> Result<Option<HitlRequest>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, sponsor_id, action_description, payload, estimated_cost,
                   status, decider, decision_note, created_at, decided_at, expires_at
            FROM hitl_requests
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_request).transpose()
    }

    async fn list_pending(&self, sponsor_id: SponsorId) -> Result<Vec<HitlRequest>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent_id, sponsor_id, action_description, payload, estimated_cost,
                   status, decider, decision_note, created_at, decided_at, expires_at
            FROM hitl_requests
            WHERE sponsor_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            "#,
        )
        .bind(sponsor_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_request).collect()
    }
}

fn hitl_status_str(status: HitlStatus) -> &'static str {
    match status {
        HitlStatus::Pending => "pending",
        HitlStatus::Approved => "approved",
        HitlStatus::Rejected => "rejected",
        HitlStatus::Expired => "expired",
    }
}
