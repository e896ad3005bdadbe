// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PostgreSQL-backed `WalletRepository`, against `micro_wallets` and the
//! append-only `wallet_transactions` ledger.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, WalletRepository};
use crate::domain::wallet::{Wallet, WalletId, WalletTransaction};

pub struct PostgresWalletRepository {
    pool: PgPool,
}

impl PostgresWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Wallet {
        Wallet {
            id: WalletId(row.get("id")),
            agent_id: AgentId(row.get("agent_id")),
            balance: row.get("balance"),
            daily_limit: row.get("daily_limit"),
            monthly_limit: row.get("monthly_limit"),
            spent_today: row.get("spent_today"),
            spent_this_month: row.get("spent_this_month"),
            last_daily_reset: row.get("last_daily_reset"),
            last_monthly_reset: row.get("last_monthly_reset"),
            frozen: row.get("frozen"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl WalletRepository for PostgresWalletRepository {
    async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Wallet>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, balance, daily_limit, monthly_limit, spent_today,
                   spent_this_month, last_daily_reset, last_monthly_reset, frozen,
                   created_at, updated_at
            FROM micro_wallets
            WHERE agent_id = $1
            FOR UPDATE
            "#,
        )
        .bind(agent_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_wallet))
    }

    async fn save_with_transaction(&self, wallet: &Wallet, transaction: &WalletTransaction) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE micro_wallets SET
                balance = $2, spent_today = $3, spent_this_month = $4,
                last_daily_reset = $5, last_monthly_reset = $6, frozen = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(wallet.id.0)
        .bind(wallet.balance)
        .bind(wallet.spent_today)
        .bind(wallet.spent_this_month)
        .bind(wallet.last_daily_reset)
        .bind(wallet.last_monthly_reset)
        .bind(wallet.frozen)
        .bind(wallet.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (id, wallet_id, amount, description, service, action_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.wallet_id.0)
        .bind(transaction.amount)
        .bind(&transaction.description)
        .bind(&transaction.service)
        .bind(&transaction.action_type)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn save(&self, wallet: &Wallet) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO micro_wallets (
                id, agent_id, balance, daily_limit, monthly_limit, spent_today,
                spent_this_month, last_daily_reset, last_monthly_reset, frozen,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                balance = EXCLUDED.balance,
                daily_limit = EXCLUDED.daily_limit,
                monthly_limit = EXCLUDED.monthly_limit,
                spent_today = EXCLUDED.spent_today,
                spent_this_month = EXCLUDED.spent_this_month,
                last_daily_reset = EXCLUDED.last_daily_reset,
                last_monthly_reset = EXCLUDED.last_monthly_reset,
                frozen = EXCLUDED.frozen,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(wallet.id.0)
        .bind(wallet.agent_id.0)
        .bind(wallet.balance)
        .bind(wallet.daily_limit)
        .bind(wallet.monthly_limit)
        .bind(wallet.spent_today)
        .bind(wallet.spent_this_month)
        .bind(wallet.last_daily_reset)
        .bind(wallet.last_monthly_reset)
        .bind(wallet.frozen)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }
}
