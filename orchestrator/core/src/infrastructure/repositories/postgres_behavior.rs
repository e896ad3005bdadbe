// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `BehaviorRepository`, against `behavior_profiles`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::behavior::BehaviorProfile;
use crate::domain::repository::{BehaviorRepository, RepositoryError};

pub struct PostgresBehaviorRepository {
    pool: PgPool,
}

impl PostgresBehaviorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_profile(row: &sqlx::postgres::PgRow) -> Result<BehaviorProfile, RepositoryError> {
        let typical_services: serde_json::Value = row.get("typical_services");
        let typical_hours: serde_json::Value = row.get("typical_hours");
        let feature_vector: serde_json::Value = row.get("feature_vector");
        Ok(BehaviorProfile {
            agent_id: AgentId(row.get("agent_id")),
            typical_services: serde_json::from_value(typical_services)?,
            typical_hours: serde_json::from_value(typical_hours)?,
            avg_requests_per_hour: row.get("avg_requests_per_hour"),
            avg_cost_per_action: row.get("avg_cost_per_action"),
            feature_vector: serde_json::from_value(feature_vector)?,
            last_updated: row.get("last_updated"),
        })
    }
}

#[async_trait]
impl BehaviorRepository for PostgresBehaviorRepository {
    async fn save(&self, profile: &BehaviorProfile) -> Result<(), RepositoryError> {
        let typical_services = serde_json::to_value(&profile.typical_services)?;
        let typical_hours = serde_json::to_value(&profile.typical_hours)?;
        let feature_vector = serde_json::to_value(&profile.feature_vector)?;

        sqlx::query(
            r#"
            INSERT INTO behavior_profiles (
                agent_id, typical_services, typical_hours, avg_requests_per_hour,
                avg_cost_per_action, feature_vector, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (agent_id) DO UPDATE SET
                typical_services = EXCLUDED.typical_services,
                typical_hours = EXCLUDED.typical_hours,
                avg_requests_per_hour = EXCLUDED.avg_requests_per_hour,
                avg_cost_per_action = EXCLUDED.avg_cost_per_action,
                feature_vector = EXCLUDED.feature_vector,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(profile.agent_id.0)
        .bind(typical_services)
        .bind(typical_hours)
        .bind(profile.avg_requests_per_hour)
        .bind(profile.avg_cost_per_action)
        .bind(feature_vector)
        .bind(profile.last_updated)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<BehaviorProfile>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT agent_id, typical_services, typical_hours, avg_requests_per_hour,
                   avg_cost_per_action, feature_vector, last_updated
            FROM behavior_profiles
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }
}
