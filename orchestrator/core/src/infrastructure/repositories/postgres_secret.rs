// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `SecretRepository`, against `secret_vault`.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::SponsorId;
use crate::domain::repository::{RepositoryError, SecretRepository};
use crate::domain::secret::{SecretId, SecretType, SecretVaultEntry};

pub struct PostgresSecretRepository {
    pool: PgPool,
}

impl PostgresSecretRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<SecretVaultEntry, RepositoryError> {
        let type_str: String = row.get("secret_type");
        let secret_type = match type_str.as_str() {
            "api_key" => SecretType::ApiKey,
            "bearer_token" => SecretType::BearerToken,
            "basic_auth" => SecretType::BasicAuth,
            _ => SecretType::Custom,
        };
        Ok(SecretVaultEntry {
            id: SecretId(row.get("id")),
            sponsor_id: SponsorId(row.get("sponsor_id")),
            service_name: row.get("service_name"),
            ciphertext: row.get("ciphertext"),
            secret_type,
            rotation_interval_hours: row.get::<i32, _>("rotation_interval_hours") as u32,
            last_rotated: row.get("last_rotated"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SecretRepository for PostgresSecretRepository {
    async fn save(&self, entry: &SecretVaultEntry) -> Result<(), RepositoryError> {
        let type_str = match entry.secret_type {
            SecretType::ApiKey => "api_key",
            SecretType::BearerToken => "bearer_token",
            SecretType::BasicAuth => "basic_auth",
            SecretType::Custom => "custom",
        };
        sqlx::query(
            r#"
            INSERT INTO secret_vault (
                id, sponsor_id, service_name, ciphertext, secret_type,
                rotation_interval_hours, last_rotated, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (sponsor_id, service_name) DO UPDATE SET
                ciphertext = EXCLUDED.ciphertext,
                secret_type = EXCLUDED.secret_type,
                rotation_interval_hours = EXCLUDED.rotation_interval_hours,
                last_rotated = EXCLUDED.last_rotated,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.sponsor_id.0)
        .bind(&entry.service_name)
        .bind(&entry.ciphertext)
        .bind(type_str)
        .bind(entry.rotation_interval_hours as i32)
        .bind(entry.last_rotated)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: SecretId) -> Result<Option<SecretVaultEntry>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT id, sponsor_id, service_name, ciphertext, secret_type, rotation_interval_hours, last_rotated, created_at, updated_at
               FROM secret_vault WHERE id = $1"#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn find_by_sponsor_and_service(&self, sponsor_id: SponsorId, service_name: &str) -> Result<Option<SecretVaultEntry>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT id, sponsor_id, service_name, ciphertext, secret_type, rotation_interval_hours, last_rotated, created_at, updated_at
               FROM secret_vault WHERE sponsor_id = $1 AND service_name = $2"#,
        )
        .bind(sponsor_id.0)
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn find_due_for_rotation(&self) -> Result<Vec<SecretVaultEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, sponsor_id, service_name, ciphertext, secret_type, rotation_interval_hours, last_rotated, created_at, updated_at
               FROM secret_vault
               WHERE rotation_interval_hours > 0
                 AND last_rotated + (rotation_interval_hours || ' hours')::interval <= NOW()"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
