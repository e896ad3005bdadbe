// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent aggregate (BC-1 Agent Lifecycle).
//!
//! An `Agent` is a non-human identity acting on behalf of a human `Sponsor`.
//! Status transitions are restricted: `active <-> suspended` is operator
//! driven, `any -> panic` is reserved for the circuit breaker (C10), and
//! `any -> revoked` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SponsorId(pub Uuid);

impl SponsorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SponsorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SponsorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status transitions: `Active <-> Suspended`, `_ -> Panic` (circuit breaker
/// only), `_ -> Revoked` (terminal). Enforcement of the legality of a given
/// transition is the identity service's job, not this enum's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Suspended,
    Revoked,
    Panic,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Revoked => "revoked",
            AgentStatus::Panic => "panic",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "suspended" => Some(AgentStatus::Suspended),
            "revoked" => Some(AgentStatus::Revoked),
            "panic" => Some(AgentStatus::Panic),
            _ => None,
        }
    }
}

/// Autonomy bucket, a pure function of trust score (thresholds 80/60/40/20).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    High,
    Medium,
    Standard,
    Restricted,
    Quarantine,
}

impl AutonomyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyLevel::High => "high",
            AutonomyLevel::Medium => "medium",
            AutonomyLevel::Standard => "standard",
            AutonomyLevel::Restricted => "restricted",
            AutonomyLevel::Quarantine => "quarantine",
        }
    }
}

/// Numeric trust score, always clamped to `[0.0, 100.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustScore(f64);

impl TrustScore {
    pub const INITIAL: f64 = 50.0;

    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 100.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Applies `delta` and returns the new, clamped score.
    pub fn adjust(&mut self, delta: f64) -> f64 {
        self.0 = (self.0 + delta).clamp(0.0, 100.0);
        self.0
    }

    /// Autonomy bucket per thresholds 80/60/40/20.
    pub fn autonomy_level(&self) -> AutonomyLevel {
        autonomy_level(self.0)
    }
}

impl Default for TrustScore {
    fn default() -> Self {
        Self::new(Self::INITIAL)
    }
}

/// Pure function: score -> autonomy bucket. Exposed standalone so callers
/// that only persist a raw `f64` (e.g. repositories) can still classify it.
pub fn autonomy_level(score: f64) -> AutonomyLevel {
    if score >= 80.0 {
        AutonomyLevel::High
    } else if score >= 60.0 {
        AutonomyLevel::Medium
    } else if score >= 40.0 {
        AutonomyLevel::Standard
    } else if score >= 20.0 {
        AutonomyLevel::Restricted
    } else {
        AutonomyLevel::Quarantine
    }
}

/// A non-human identity (NHI) acting on behalf of a human sponsor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub sponsor_id: SponsorId,
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub trust_score: TrustScore,
    /// SHA3-256 hex digest, globally unique, derived at registration time.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to agent registration (§4.2 `register`).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRegistrationSpec {
    pub name: String,
    pub agent_type: String,
}

impl Agent {
    pub fn new(sponsor_id: SponsorId, spec: AgentRegistrationSpec, fingerprint: String) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            sponsor_id,
            name: spec.name,
            agent_type: spec.agent_type,
            status: AgentStatus::Active,
            trust_score: TrustScore::default(),
            fingerprint,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, AgentStatus::Active)
    }

    /// `active <-> suspended` only. Returns `false` (no-op) for any other
    /// current status.
    pub fn suspend(&mut self) -> bool {
        if self.status == AgentStatus::Active {
            self.status = AgentStatus::Suspended;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    pub fn activate(&mut self) -> bool {
        if self.status == AgentStatus::Suspended {
            self.status = AgentStatus::Active;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }

    /// Reserved for the circuit breaker (C10). `any -> panic`, except an
    /// already-revoked agent stays revoked (terminal wins).
    pub fn panic(&mut self) -> bool {
        if self.status == AgentStatus::Revoked {
            return false;
        }
        self.status = AgentStatus::Panic;
        self.updated_at = Utc::now();
        true
    }

    /// `any -> revoked`, terminal.
    pub fn revoke(&mut self) {
        self.status = AgentStatus::Revoked;
        self.updated_at = Utc::now();
    }

    /// Adjusts trust score, clamped to `[0, 100]`, and returns the new value.
    pub fn adjust_trust(&mut self, delta: f64) -> f64 {
        let new_value = self.trust_score.adjust(delta);
        self.updated_at = Utc::now();
        new_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autonomy_thresholds() {
        assert_eq!(autonomy_level(100.0).as_str(), "high");
        assert_eq!(autonomy_level(80.0).as_str(), "high");
        assert_eq!(autonomy_level(79.9).as_str(), "medium");
        assert_eq!(autonomy_level(60.0).as_str(), "medium");
        assert_eq!(autonomy_level(40.0).as_str(), "standard");
        assert_eq!(autonomy_level(20.0).as_str(), "restricted");
        assert_eq!(autonomy_level(19.9).as_str(), "quarantine");
        assert_eq!(autonomy_level(0.0).as_str(), "quarantine");
    }

    #[test]
    fn trust_score_clamps() {
        let mut score = TrustScore::new(95.0);
        assert_eq!(score.adjust(10.0), 100.0);
        assert_eq!(score.adjust(-1000.0), 0.0);
    }

    #[test]
    fn panic_cascade_matches_scenario_3() {
        let mut agent = Agent::new(
            SponsorId::new(),
            AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() },
            "f".repeat(64),
        );
        agent.trust_score = TrustScore::new(50.0);
        assert_eq!(agent.adjust_trust(-10.0), 40.0); // firewall
        assert_eq!(agent.adjust_trust(-5.0), 35.0); // anomaly
        assert_eq!(agent.adjust_trust(-15.0), 20.0); // circuit breaker
        assert_eq!(agent.adjust_trust(-2.0), 18.0); // policy violation
        assert_eq!(agent.trust_score.autonomy_level().as_str(), "quarantine");
    }

    #[test]
    fn status_transitions_respect_invariants() {
        let mut agent = Agent::new(
            SponsorId::new(),
            AgentRegistrationSpec { name: "bot".into(), agent_type: "llm".into() },
            "a".repeat(64),
        );
        assert!(agent.suspend());
        assert!(!agent.suspend()); // already suspended, no-op
        assert!(agent.activate());
        agent.revoke();
        assert!(!agent.panic()); // revoked is terminal
        assert_eq!(agent.status, AgentStatus::Revoked);
    }
}
