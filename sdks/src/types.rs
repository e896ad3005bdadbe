// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wire types for `POST /proxy/execute`, re-exported from `aegis-core` so
//! agent hosts depend on a single source of truth for the request/response
//! shape instead of hand-maintaining a parallel copy.

pub use aegis_core::application::pipeline::{ExecuteRequest, ExecuteResponse, ExecuteStatus, PolicyResultView};
pub use aegis_core::domain::agent::{AgentId, SponsorId};
pub use aegis_core::domain::hitl::{HitlRequest, HitlRequestId, HitlStatus};
