// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sponsor notification events, emitted by the pipeline at the points named
//! in §4.14 (steps 5 and 8: anomaly detected, circuit breaker tripped) and
//! by the HITL gateway. Consumed by the alerting sink, an out-of-scope
//! external collaborator — the core only produces these, never interprets
//! them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::agent::{AgentId, SponsorId};
use super::hitl::HitlRequestId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum SponsorNotification {
    AnomalyDetected {
        agent_id: AgentId,
        sponsor_id: SponsorId,
        risk_score: f64,
        anomalies: Vec<String>,
        detected_at: DateTime<Utc>,
    },
    CircuitBreakerTripped {
        agent_id: AgentId,
        sponsor_id: SponsorId,
        current_window_total: Decimal,
        previous_window_total: Decimal,
        tripped_at: DateTime<Utc>,
    },
    HitlRequestCreated {
        request_id: HitlRequestId,
        agent_id: AgentId,
        sponsor_id: SponsorId,
        estimated_cost: Decimal,
        is_high_cost: bool,
        created_at: DateTime<Utc>,
    },
    HitlRequestDecided {
        request_id: HitlRequestId,
        agent_id: AgentId,
        sponsor_id: SponsorId,
        approved: bool,
        decided_at: DateTime<Utc>,
    },
}

impl SponsorNotification {
    pub fn sponsor_id(&self) -> SponsorId {
        match self {
            SponsorNotification::AnomalyDetected { sponsor_id, .. }
            | SponsorNotification::CircuitBreakerTripped { sponsor_id, .. }
            | SponsorNotification::HitlRequestCreated { sponsor_id, .. }
            | SponsorNotification::HitlRequestDecided { sponsor_id, .. } => *sponsor_id,
        }
    }
}
