// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `AgentRepository`, against the `agents` table.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{Agent, AgentId, AgentStatus, SponsorId, TrustScore};
use crate::domain::repository::{AgentRepository, RepositoryError};

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::postgres::PgRow) -> Result<Agent, RepositoryError> {
        let status_str: String = row.get("status");
        let status = AgentStatus::from_str_opt(&status_str)
            .ok_or_else(|| RepositoryError::Database(format!("unknown agent status: {status_str}")))?;
        Ok(Agent {
            id: AgentId(row.get("id")),
            sponsor_id: SponsorId(row.get("sponsor_id")),
            name: row.get("name"),
            agent_type: row.get("agent_type"),
            status,
            trust_score: TrustScore::new(row.get::<f64, _>("trust_score")),
            fingerprint: row.get("fingerprint"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, sponsor_id, name, agent_type, status, trust_score, fingerprint, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                agent_type = EXCLUDED.agent_type,
                status = EXCLUDED.status,
                trust_score = EXCLUDED.trust_score,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(agent.id.0)
        .bind(agent.sponsor_id.0)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(agent.status.as_str())
        .bind(agent.trust_score.value())
        .bind(&agent.fingerprint)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("failed to save agent: {e}")))?;

        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, sponsor_id, name, agent_type, status, trust_score, fingerprint, created_at, updated_at
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn find_for_sponsor(&self, id: AgentId, sponsor_id: SponsorId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, sponsor_id, name, agent_type, status, trust_score, fingerprint, created_at, updated_at
            FROM agents
            WHERE id = $1 AND sponsor_id = $2
            "#,
        )
        .bind(id.0)
        .bind(sponsor_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn list_for_sponsor(&self, sponsor_id: SponsorId, limit: i64, offset: i64) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sponsor_id, name, agent_type, status, trust_score, fingerprint, created_at, updated_at
            FROM agents
            WHERE sponsor_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(sponsor_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM agents WHERE fingerprint = $1) AS exists_flag")
            .bind(fingerprint)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(row.get("exists_flag"))
    }
}
