// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository implementations.
//!
//! One trait per aggregate root lives in [`crate::domain::repository`]; this
//! module provides two implementations of each: a PostgreSQL adapter for
//! production and an in-memory adapter for local development and tests.

pub mod in_memory;
pub mod postgres_agent;
pub mod postgres_audit;
pub mod postgres_behavior;
pub mod postgres_export_ledger;
pub mod postgres_hitl;
pub mod postgres_permission;
pub mod postgres_secret;
pub mod postgres_snapshot;
pub mod postgres_wallet;
