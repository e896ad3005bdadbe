// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `ExportLedgerRepository`, against the append-only
//! `immutable_exports` table. Insert-only: no update or delete path exists
//! here, matching the audit log's own immutability rule (§6).

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::domain::export_ledger::ExportLedgerEntry;
use crate::domain::repository::{ExportLedgerRepository, RepositoryError};

pub struct PostgresExportLedgerRepository {
    pool: PgPool,
}

impl PostgresExportLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExportLedgerRepository for PostgresExportLedgerRepository {
    async fn insert(&self, entry: &ExportLedgerEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO immutable_exports (
                id, from_id, to_id, record_count, export_hash, storage_backend,
                storage_path, tsa_token, exported_by, exported_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.from_audit_id)
        .bind(entry.to_audit_id)
        .bind(entry.record_count)
        .bind(&entry.batch_hash)
        .bind(&entry.storage_backend)
        .bind(&entry.storage_path)
        .bind(&entry.tsa_token)
        .bind(&entry.exported_by)
        .bind(entry.exported_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }
}
