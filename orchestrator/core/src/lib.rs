// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # aegis-core
//!
//! Core execution pipeline and stateful subsystems for the AEGIS agent proxy.
//! This crate owns the domain model, the application services that
//! orchestrate them, the infrastructure adapters that back them (Postgres,
//! Redis, the outbound HTTP clients), and the HTTP presentation surface that
//! exposes `POST /proxy/execute` to callers.
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum): /proxy/execute, HITL review endpoints
//!     ↓
//! application/    ← pipeline orchestration, wallet/identity/audit/HITL services
//!     ↓
//! domain/         ← aggregates, value objects, repository traits
//!     ↓
//! infrastructure/ ← Postgres repos, Redis-backed stores, crypto, outbound clients
//! ```
//!
//! Every mutating action an agent takes flows through the 21-step pipeline in
//! [`application::pipeline`]; the other application services are its
//! collaborators plus the daemon's periodic maintenance jobs.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
