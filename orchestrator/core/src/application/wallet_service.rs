// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wallet service (C5): preflight and charge against an agent's wallet.
//!
//! `WalletRepository::find_by_agent` takes a `FOR UPDATE` row lock on the
//! Postgres adapter, but that lock only spans the single `SELECT` — it does
//! not extend across the read-modify-write into `save_with_transaction`'s
//! separate statement. Two concurrent `charge` calls for the same agent can
//! therefore both read the pre-charge balance before either writes back.
//! Rather than restructure the repository trait around an explicit
//! transaction handle (out of scope for this pass), this service serializes
//! concurrent charges per agent with an in-process mutex, which is
//! sufficient for a single proxy instance and a known simplification for a
//! multi-instance deployment (see DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, WalletRepository};
use crate::domain::wallet::{Wallet, WalletDenialReason, WalletTransaction};

#[derive(Debug, thiserror::Error)]
pub enum WalletServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("no wallet provisioned for this agent")]
    NotProvisioned,
    #[error("charge denied: {0}")]
    Denied(#[from] WalletDenialReason),
}

pub struct WalletService {
    wallets: Arc<dyn WalletRepository>,
    locks: parking_lot::Mutex<HashMap<AgentId, Arc<Mutex<()>>>>,
}

impl WalletService {
    pub fn new(wallets: Arc<dyn WalletRepository>) -> Self {
        Self { wallets, locks: parking_lot::Mutex::new(HashMap::new()) }
    }

    fn lock_for(&self, agent_id: AgentId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(agent_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn find_by_agent(&self, agent_id: AgentId) -> Result<Option<Wallet>, WalletServiceError> {
        Ok(self.wallets.find_by_agent(agent_id).await?)
    }

    /// Read-only preflight (§4.14 step 7): does not charge, just answers
    /// whether `amount` could currently be spent.
    pub async fn preflight(&self, agent_id: AgentId, amount: Decimal) -> Result<(), WalletServiceError> {
        let mut wallet = self.wallets.find_by_agent(agent_id).await?.ok_or(WalletServiceError::NotProvisioned)?;
        wallet.can_spend(amount, Utc::now())?;
        Ok(())
    }

    /// Re-validates and applies the charge under the agent's lock, then
    /// persists the wallet and its ledger row in one transaction (§4.14
    /// step 14).
    pub async fn charge(
        &self,
        agent_id: AgentId,
        amount: Decimal,
        description: String,
        service: String,
        action_type: String,
    ) -> Result<Wallet, WalletServiceError> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let mut wallet = self.wallets.find_by_agent(agent_id).await?.ok_or(WalletServiceError::NotProvisioned)?;
        let now = Utc::now();
        wallet.reserve_and_charge(amount, now)?;

        let transaction = WalletTransaction {
            id: uuid::Uuid::new_v4(),
            wallet_id: wallet.id,
            amount: -amount,
            description,
            service,
            action_type,
            created_at: now,
        };
        self.wallets.save_with_transaction(&wallet, &transaction).await?;
        Ok(wallet)
    }

    pub async fn top_up(&self, agent_id: AgentId, amount: Decimal) -> Result<Wallet, WalletServiceError> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let mut wallet = self.wallets.find_by_agent(agent_id).await?.ok_or(WalletServiceError::NotProvisioned)?;
        wallet.top_up(amount, Utc::now());
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    /// Reserved for the circuit breaker trip cascade (§4.8 step 5).
    pub async fn freeze(&self, agent_id: AgentId) -> Result<(), WalletServiceError> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let mut wallet = self.wallets.find_by_agent(agent_id).await?.ok_or(WalletServiceError::NotProvisioned)?;
        wallet.freeze();
        self.wallets.save(&wallet).await?;
        Ok(())
    }

    pub async fn unfreeze(&self, agent_id: AgentId) -> Result<(), WalletServiceError> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let mut wallet = self.wallets.find_by_agent(agent_id).await?.ok_or(WalletServiceError::NotProvisioned)?;
        wallet.unfreeze();
        self.wallets.save(&wallet).await?;
        Ok(())
    }

    pub async fn provision(&self, agent_id: AgentId, daily_limit: Decimal, monthly_limit: Decimal) -> Result<Wallet, WalletServiceError> {
        let wallet = Wallet::new(agent_id, daily_limit, monthly_limit);
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::InMemoryWalletRepository;
    use rust_decimal_macros::dec;

    fn service() -> WalletService {
        WalletService::new(Arc::new(InMemoryWalletRepository::new()))
    }

    #[tokio::test]
    async fn charge_updates_balance_and_ledger() {
        let svc = service();
        let agent_id = AgentId::new();
        let wallet = svc.provision(agent_id, dec!(10.00), dec!(100.00)).await.unwrap();
        svc.top_up(agent_id, dec!(5.00)).await.unwrap();

        let charged = svc.charge(agent_id, dec!(1.00), "call".into(), "openai".into(), "chat".into()).await.unwrap();
        assert_eq!(charged.balance, dec!(4.00));
        assert_eq!(charged.spent_today, dec!(1.00));
        assert_eq!(wallet.agent_id, agent_id);
    }

    #[tokio::test]
    async fn concurrent_charges_never_overdraw() {
        let svc = Arc::new(service());
        let agent_id = AgentId::new();
        svc.provision(agent_id, dec!(1000.00), dec!(100000.00)).await.unwrap();
        svc.top_up(agent_id, dec!(10.00)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                svc.charge(agent_id, dec!(1.00), "x".into(), "svc".into(), "act".into()).await
            }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 10);
        let wallet = svc.find_by_agent(agent_id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn frozen_wallet_denies_charge() {
        let svc = service();
        let agent_id = AgentId::new();
        svc.provision(agent_id, dec!(10.00), dec!(100.00)).await.unwrap();
        svc.top_up(agent_id, dec!(5.00)).await.unwrap();
        svc.freeze(agent_id).await.unwrap();

        let err = svc.charge(agent_id, dec!(1.00), "x".into(), "svc".into(), "act".into()).await.unwrap_err();
        assert!(matches!(err, WalletServiceError::Denied(WalletDenialReason::Frozen)));
    }
}
