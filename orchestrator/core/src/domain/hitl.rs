// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HITL (human-in-the-loop) request aggregate (C12).
//!
//! Status transitions form a DAG: `pending -> {approved, rejected, expired}`.
//! Terminal states never change; the first terminal write wins.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::{AgentId, SponsorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitlRequestId(pub Uuid);

impl HitlRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HitlRequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl HitlStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HitlStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlRequest {
    pub id: HitlRequestId,
    pub agent_id: AgentId,
    pub sponsor_id: SponsorId,
    pub action_description: String,
    /// Opaque snapshot of the would-be request payload.
    pub payload: serde_json::Value,
    pub estimated_cost: Decimal,
    pub status: HitlStatus,
    pub decider: Option<String>,
    pub decision_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Threshold above which `create` also warns the alerting sink (§4.10).
pub const HIGH_COST_WARNING_THRESHOLD: &str = "10.00";

impl HitlRequest {
    pub fn new(
        agent_id: AgentId,
        sponsor_id: SponsorId,
        action_description: String,
        payload: serde_json::Value,
        estimated_cost: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: HitlRequestId::new(),
            agent_id,
            sponsor_id,
            action_description,
            payload,
            estimated_cost,
            status: HitlStatus::Pending,
            decider: None,
            decision_note: None,
            created_at: now,
            decided_at: None,
            expires_at: now + Duration::minutes(30),
        }
    }

    pub fn is_high_cost(&self) -> bool {
        self.estimated_cost > HIGH_COST_WARNING_THRESHOLD.parse().unwrap_or(Decimal::ZERO)
    }

    /// Atomic decision application: if already terminal, returns the
    /// current status unchanged. If expired by wall-clock but still stored
    /// as pending, transitions to `expired` instead of honoring the
    /// decision. Otherwise records the decision.
    pub fn decide(&mut self, decider: String, approved: bool, note: Option<String>, now: DateTime<Utc>) -> HitlStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if now > self.expires_at {
            self.status = HitlStatus::Expired;
            self.decided_at = Some(now);
            return self.status;
        }
        self.status = if approved { HitlStatus::Approved } else { HitlStatus::Rejected };
        self.decider = Some(decider);
        self.decision_note = note;
        self.decided_at = Some(now);
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> HitlRequest {
        HitlRequest::new(
            AgentId::new(),
            SponsorId::new(),
            "wire transfer".into(),
            serde_json::json!({}),
            dec!(25.00),
        )
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut r = request();
        let now = Utc::now();
        assert_eq!(r.decide("alice".into(), true, None, now), HitlStatus::Approved);
        // second decision is a no-op
        assert_eq!(r.decide("bob".into(), false, None, now), HitlStatus::Approved);
        assert_eq!(r.decider.as_deref(), Some("alice"));
    }

    #[test]
    fn expiry_wins_over_late_decision() {
        let mut r = request();
        let late = r.expires_at + Duration::seconds(1);
        assert_eq!(r.decide("alice".into(), true, None, late), HitlStatus::Expired);
    }

    #[test]
    fn high_cost_threshold() {
        let mut r = request();
        r.estimated_cost = dec!(10.01);
        assert!(r.is_high_cost());
        r.estimated_cost = dec!(10.00);
        assert!(!r.is_high_cost());
    }
}
