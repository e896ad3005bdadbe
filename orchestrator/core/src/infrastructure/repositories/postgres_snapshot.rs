// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `SnapshotRepository`, against `state_snapshots`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{RepositoryError, SnapshotRepository};
use crate::domain::snapshot::{SnapshotId, StateSnapshot};

pub struct PostgresSnapshotRepository {
    pool: PgPool,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_snapshot(row: &sqlx::postgres::PgRow) -> StateSnapshot {
        StateSnapshot {
            id: SnapshotId(row.get("id")),
            audit_id: row.get("audit_id"),
            snapshot_data: row.get("snapshot_data"),
            rollback_instructions: row.get("rollback_instructions"),
            rolled_back: row.get("rolled_back"),
            rolled_back_at: row.get("rolled_back_at"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl SnapshotRepository for PostgresSnapshotRepository {
    async fn save(&self, snapshot: &StateSnapshot) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO state_snapshots (
                id, audit_id, snapshot_data, rollback_instructions, rolled_back, rolled_back_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                rolled_back = EXCLUDED.rolled_back,
                rolled_back_at = EXCLUDED.rolled_back_at
            "#,
        )
        .bind(snapshot.id.0)
        .bind(snapshot.audit_id)
        .bind(&snapshot.snapshot_data)
        .bind(&snapshot.rollback_instructions)
        .bind(snapshot.rolled_back)
        .bind(snapshot.rolled_back_at)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: SnapshotId) -> Result<Option<StateSnapshot>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, audit_id, snapshot_data, rollback_instructions, rolled_back, rolled_back_at, created_at
            FROM state_snapshots
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_snapshot))
    }
}
