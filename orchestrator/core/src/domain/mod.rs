// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod audit;
pub mod behavior;
pub mod events;
pub mod export_ledger;
pub mod hitl;
pub mod permission;
pub mod policy;
pub mod repository;
pub mod secret;
pub mod snapshot;
pub mod wallet;
