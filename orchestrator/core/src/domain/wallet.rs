// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wallet aggregate (C5 Wallet service).
//!
//! All monetary fields are fixed-point `rust_decimal::Decimal` (12 digits,
//! 6 fractional) — never binary float, per the persisted `Numeric(12,6)`
//! column type. One wallet per agent.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletId(pub Uuid);

impl WalletId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WalletId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub agent_id: AgentId,
    pub balance: Decimal,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub spent_today: Decimal,
    pub spent_this_month: Decimal,
    pub last_daily_reset: NaiveDate,
    pub last_monthly_reset: NaiveDate,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only ledger row, one per charge or top-up. `amount` is signed:
/// negative for a charge, positive for a top-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub description: String,
    pub service: String,
    pub action_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletDenialReason {
    Frozen,
    InsufficientBalance { balance: Decimal, requested: Decimal },
    DailyLimitExceeded,
    MonthlyLimitExceeded,
}

impl std::fmt::Display for WalletDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletDenialReason::Frozen => write!(f, "Wallet is frozen"),
            WalletDenialReason::InsufficientBalance { balance, requested } => {
                write!(f, "Insufficient balance: {:.4} < {:.4}", balance, requested)
            }
            WalletDenialReason::DailyLimitExceeded => write!(f, "Daily limit exceeded"),
            WalletDenialReason::MonthlyLimitExceeded => write!(f, "Monthly limit exceeded"),
        }
    }
}

impl Wallet {
    pub fn new(agent_id: AgentId, daily_limit: Decimal, monthly_limit: Decimal) -> Self {
        let now = Utc::now();
        let today = now.date_naive();
        Self {
            id: WalletId::new(),
            agent_id,
            balance: Decimal::ZERO,
            daily_limit,
            monthly_limit,
            spent_today: Decimal::ZERO,
            spent_this_month: Decimal::ZERO,
            last_daily_reset: today,
            last_monthly_reset: today,
            frozen: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Lazily resets daily/monthly spend counters if the stored reset date
    /// has fallen behind `now`. Must run inside the same locked section as
    /// any subsequent balance check so concurrent requests see a consistent
    /// pre/post-reset state.
    pub fn reset_windows_if_stale(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.last_daily_reset < today {
            self.spent_today = Decimal::ZERO;
            self.last_daily_reset = today;
        }
        if self.last_monthly_reset.year() != today.year() || self.last_monthly_reset.month() != today.month() {
            self.spent_this_month = Decimal::ZERO;
            self.last_monthly_reset = today;
        }
    }

    /// Read-only preflight; does not mutate spend counters beyond a
    /// caller-visible in-memory reset (the repository decides whether to
    /// persist that reset).
    pub fn can_spend(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), WalletDenialReason> {
        self.reset_windows_if_stale(now);
        if self.frozen {
            return Err(WalletDenialReason::Frozen);
        }
        if self.balance < amount {
            return Err(WalletDenialReason::InsufficientBalance { balance: self.balance, requested: amount });
        }
        if self.spent_today + amount > self.daily_limit {
            return Err(WalletDenialReason::DailyLimitExceeded);
        }
        if self.spent_this_month + amount > self.monthly_limit {
            return Err(WalletDenialReason::MonthlyLimitExceeded);
        }
        Ok(())
    }

    /// Re-validates and applies a charge. Callers must hold the wallet's
    /// row-level exclusive lock across this call and the surrounding
    /// transaction.
    pub fn reserve_and_charge(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), WalletDenialReason> {
        self.can_spend(amount, now)?;
        self.balance -= amount;
        self.spent_today += amount;
        self.spent_this_month += amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn top_up(&mut self, amount: Decimal, now: DateTime<Utc>) {
        self.balance += amount;
        self.updated_at = now;
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }
}

use chrono::Datelike;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wallet() -> Wallet {
        Wallet::new(AgentId::new(), dec!(10.00), dec!(1000.00))
    }

    #[test]
    fn scenario_wallet_exhaustion() {
        let mut w = wallet();
        w.balance = dec!(1.00);
        let now = Utc::now();
        let err = w.can_spend(dec!(50.0), now).unwrap_err();
        assert_eq!(err.to_string(), "Insufficient balance: 1.0000 < 50.0000");
    }

    #[test]
    fn scenario_daily_limit_creeping() {
        let mut w = wallet();
        w.balance = dec!(100.00);
        let now = Utc::now();
        for _ in 0..90 {
            w.reserve_and_charge(dec!(0.11), now).expect("should succeed");
        }
        assert_eq!(w.spent_today, dec!(9.90));
        let err = w.reserve_and_charge(dec!(0.11), now).unwrap_err();
        assert_eq!(err, WalletDenialReason::DailyLimitExceeded);
    }

    #[test]
    fn frozen_wallet_denies_all_charges() {
        let mut w = wallet();
        w.balance = dec!(100.00);
        w.freeze();
        let now = Utc::now();
        assert_eq!(w.can_spend(dec!(0.01), now).unwrap_err(), WalletDenialReason::Frozen);
    }

    #[test]
    fn invariants_hold_after_sequence_of_charges() {
        let mut w = wallet();
        w.balance = dec!(5.00);
        let now = Utc::now();
        let mut total = Decimal::ZERO;
        for _ in 0..3 {
            w.reserve_and_charge(dec!(1.00), now).unwrap();
            total += dec!(1.00);
        }
        assert_eq!(w.balance, dec!(5.00) - total);
        assert_eq!(w.spent_today, total);
        assert!(w.spent_today <= w.daily_limit);
        assert!(w.balance >= Decimal::ZERO);
    }
}
