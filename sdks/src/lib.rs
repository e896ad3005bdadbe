// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rust client for agent hosts that call the AEGIS execution proxy's
//! `POST /proxy/execute` and HITL review endpoints (§6) instead of reaching
//! third-party services directly.

pub mod client;
pub mod types;

pub use client::{AegisClient, AegisClientError};
pub use types::*;
