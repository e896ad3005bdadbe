// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Behavior profile aggregate (backing store for C8 Anomaly detector).
//!
//! One profile per agent, recomputed periodically from the rolling action
//! buffer held in the ephemeral store (C2); this type is the persisted
//! summary, not the rolling buffer itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::agent::AgentId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub agent_id: AgentId,
    pub typical_services: Vec<String>,
    /// Hour-of-day (0-23) -> observed frequency.
    pub typical_hours: HashMap<u8, u32>,
    pub avg_requests_per_hour: f64,
    pub avg_cost_per_action: Decimal,
    /// Opaque feature vector, not interpreted by the core.
    pub feature_vector: Vec<f64>,
    pub last_updated: DateTime<Utc>,
}

impl BehaviorProfile {
    pub fn empty(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            typical_services: Vec::new(),
            typical_hours: HashMap::new(),
            avg_requests_per_hour: 0.0,
            avg_cost_per_action: Decimal::ZERO,
            feature_vector: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_typical_service(&self, service: &str) -> bool {
        self.typical_services.iter().any(|s| s == service)
    }

    pub fn hour_frequency(&self, hour: u8) -> u32 {
        self.typical_hours.get(&hour).copied().unwrap_or(0)
    }
}

/// A single action record as kept in the rolling ephemeral-store buffer
/// (most recent 1000 entries, per agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub service: String,
    pub action: String,
    pub hour_of_day: u8,
    pub unix_timestamp: i64,
    pub cost: Decimal,
}

/// Recomputes typical services, hour-frequency map, and average rph from a
/// rolling buffer snapshot. Pure with respect to its input slice.
pub fn recompute_profile(agent_id: AgentId, records: &[ActionRecord]) -> BehaviorProfile {
    if records.is_empty() {
        return BehaviorProfile::empty(agent_id);
    }

    let mut services: Vec<String> = Vec::new();
    let mut hours: HashMap<u8, u32> = HashMap::new();
    let mut total_cost = Decimal::ZERO;

    for record in records {
        if !services.iter().any(|s| s == &record.service) {
            services.push(record.service.clone());
        }
        *hours.entry(record.hour_of_day).or_insert(0) += 1;
        total_cost += record.cost;
    }

    let span_hours = hours.len().max(1) as f64;
    let avg_rph = records.len() as f64 / span_hours;
    let avg_cost = total_cost / Decimal::from(records.len());

    BehaviorProfile {
        agent_id,
        typical_services: services,
        typical_hours: hours,
        avg_requests_per_hour: avg_rph,
        avg_cost_per_action: avg_cost,
        feature_vector: Vec::new(),
        last_updated: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_records_yield_empty_profile() {
        let profile = recompute_profile(AgentId::new(), &[]);
        assert!(profile.typical_services.is_empty());
        assert_eq!(profile.avg_requests_per_hour, 0.0);
    }

    #[test]
    fn recompute_tracks_services_and_hours() {
        let records = vec![
            ActionRecord { service: "openai".into(), action: "chat".into(), hour_of_day: 9, unix_timestamp: 0, cost: dec!(0.10) },
            ActionRecord { service: "openai".into(), action: "chat".into(), hour_of_day: 9, unix_timestamp: 1, cost: dec!(0.20) },
        ];
        let profile = recompute_profile(AgentId::new(), &records);
        assert!(profile.is_typical_service("openai"));
        assert_eq!(profile.hour_frequency(9), 2);
        assert_eq!(profile.avg_cost_per_action, dec!(0.15));
    }
}
