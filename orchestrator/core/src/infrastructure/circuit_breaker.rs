// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Circuit breaker (C10): velocity-based panic trip per agent.
//!
//! Charges are recorded in a Redis sorted set keyed by timestamp, scoped to
//! the agent. Tripping moves the agent to `panic`, revokes its JIT tokens,
//! freezes its wallet, and records the trip — in that order (§4.8 step 5).

use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::agent::AgentId;
use crate::infrastructure::ephemeral_store::EphemeralStore;

pub const DEFAULT_WINDOW_SECS: i64 = 300;
pub const DEFAULT_THRESHOLD_PCT: f64 = 300.0;
const BASELINE_MULTIPLIER: f64 = 4.0;
const TRIP_HISTORY_CAP: isize = 100;

fn charges_key(agent_id: AgentId) -> String {
    format!("breaker:charges:{}", agent_id)
}

fn baseline_key(agent_id: AgentId) -> String {
    format!("breaker:baseline:{}", agent_id)
}

fn trips_key(agent_id: AgentId) -> String {
    format!("breaker:trips:{}", agent_id)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerOutcome {
    Ok,
    Tripped { current_window_total: Decimal, previous_window_total: Decimal },
}

pub struct CircuitBreaker {
    store: EphemeralStore,
    window_secs: i64,
    threshold_pct: f64,
}

impl CircuitBreaker {
    pub fn new(store: EphemeralStore) -> Self {
        Self { store, window_secs: DEFAULT_WINDOW_SECS, threshold_pct: DEFAULT_THRESHOLD_PCT }
    }

    pub fn with_config(store: EphemeralStore, window_secs: i64, threshold_pct: f64) -> Self {
        Self { store, window_secs, threshold_pct }
    }

    /// Feeds a completed charge into the rolling sum. Called after a
    /// successful `reserve_and_charge` (§4.14 step 14).
    pub async fn record_charge(&self, agent_id: AgentId, amount: Decimal) -> Result<(), crate::infrastructure::ephemeral_store::StoreError> {
        let now = Utc::now().timestamp();
        let member = format!("{}|{}", now, amount);
        self.store.zadd(&charges_key(agent_id), &member, now as f64).await
    }

    async fn window_sum(&self, agent_id: AgentId, from: i64, to: i64) -> Decimal {
        match self.store.zrangebyscore(&charges_key(agent_id), from as f64, to as f64).await {
            Ok(members) => members
                .iter()
                .filter_map(|m| m.split('|').nth(1))
                .filter_map(|amount| Decimal::from_str(amount).ok())
                .sum(),
            Err(_) => Decimal::ZERO,
        }
    }

    async fn baseline(&self, agent_id: AgentId) -> Option<Decimal> {
        self.store
            .get(&baseline_key(agent_id))
            .await
            .ok()
            .flatten()
            .and_then(|s| Decimal::from_str(&s).ok())
    }

    /// Sums the current and previous windows (plus the pending amount in
    /// the current window) and decides whether to trip, per §4.8.
    pub async fn check_and_trip(&self, agent_id: AgentId, pending_amount: Decimal) -> CircuitBreakerOutcome {
        let now = Utc::now().timestamp();
        let window = self.window_secs;

        let current = self.window_sum(agent_id, now - window, now).await + pending_amount;
        let previous = self.window_sum(agent_id, now - 2 * window, now - window).await;

        let mut should_trip = false;
        if previous > Decimal::ZERO {
            let pct_increase = (current - previous) / previous * Decimal::from(100);
            if pct_increase >= Decimal::from_f64_retain(self.threshold_pct).unwrap_or_default() {
                should_trip = true;
            }
        }
        if let Some(baseline) = self.baseline(agent_id).await {
            if baseline > Decimal::ZERO && current > baseline * Decimal::from_f64_retain(BASELINE_MULTIPLIER).unwrap_or_default() {
                should_trip = true;
            }
        }

        if should_trip {
            CircuitBreakerOutcome::Tripped { current_window_total: current, previous_window_total: previous }
        } else {
            CircuitBreakerOutcome::Ok
        }
    }

    /// Records a trip event for observability and forensics. Trimmed to the
    /// most recent 100 entries per agent.
    pub async fn record_trip(&self, agent_id: AgentId, outcome: &CircuitBreakerOutcome) -> Result<(), crate::infrastructure::ephemeral_store::StoreError> {
        if let CircuitBreakerOutcome::Tripped { current_window_total, previous_window_total } = outcome {
            let event = serde_json::json!({
                "current": current_window_total,
                "previous": previous_window_total,
                "at": Utc::now(),
            })
            .to_string();
            self.store.rpush(&trips_key(agent_id), &event).await?;
            self.store.ltrim(&trips_key(agent_id), -TRIP_HISTORY_CAP, -1).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_equality_for_tripped_variant() {
        let a = CircuitBreakerOutcome::Tripped { current_window_total: Decimal::from(10), previous_window_total: Decimal::from(2) };
        let b = CircuitBreakerOutcome::Tripped { current_window_total: Decimal::from(10), previous_window_total: Decimal::from(2) };
        assert_eq!(a, b);
        assert_ne!(a, CircuitBreakerOutcome::Ok);
    }
}
