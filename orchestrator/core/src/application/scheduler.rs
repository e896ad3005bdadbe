// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Background scheduler (C17): the two periodic tasks the daemon runs
//! alongside the HTTP server (§4.15) — audit flush and secret rotation scan.
//! Both tasks tolerate transient failures by simply trying again on the next
//! tick; neither ever panics the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::application::audit_service::AuditService;
use crate::domain::repository::SecretRepository;
use crate::domain::secret::SecretVaultEntry;

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("rotation strategy unavailable: {0}")]
    Unavailable(String),
}

/// Performs the actual credential exchange with the third-party service a
/// secret belongs to. Rotating the underlying secret is the sponsor's own
/// key-management concern, out of scope for this core (§1 non-goals); this
/// trait is the seam a real integration plugs into.
#[async_trait]
pub trait SecretRotationStrategy: Send + Sync {
    async fn rotate(&self, entry: &SecretVaultEntry) -> Result<Vec<u8>, RotationError>;
}

/// Default strategy: logs that a rotation is due but performs no credential
/// exchange, leaving the ciphertext untouched. Keeps the scan wired
/// end-to-end without inventing an integration no spec names.
pub struct LoggingRotationStrategy;

#[async_trait]
impl SecretRotationStrategy for LoggingRotationStrategy {
    async fn rotate(&self, entry: &SecretVaultEntry) -> Result<Vec<u8>, RotationError> {
        tracing::warn!(
            secret_id = ?entry.id,
            service = %entry.service_name,
            "secret rotation is due but no rotation strategy is configured; leaving ciphertext unchanged"
        );
        Ok(entry.ciphertext.clone())
    }
}

pub struct Scheduler {
    audit: Arc<AuditService>,
    secrets: Arc<dyn SecretRepository>,
    rotation: Arc<dyn SecretRotationStrategy>,
    audit_flush_interval: Duration,
    rotation_check_interval: Duration,
}

impl Scheduler {
    pub fn new(
        audit: Arc<AuditService>,
        secrets: Arc<dyn SecretRepository>,
        rotation: Arc<dyn SecretRotationStrategy>,
        audit_flush_interval_secs: u64,
        rotation_check_interval_secs: u64,
    ) -> Self {
        Self {
            audit,
            secrets,
            rotation,
            audit_flush_interval: Duration::from_secs(audit_flush_interval_secs.max(1)),
            rotation_check_interval: Duration::from_secs(rotation_check_interval_secs.max(1)),
        }
    }

    /// Spawns both periodic tasks and returns a handle that can drain and
    /// stop them on shutdown.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let audit_task = tokio::spawn({
            let this = self.clone();
            async move { this.run_audit_flush_loop().await }
        });
        let rotation_task = tokio::spawn({
            let this = self.clone();
            async move { this.run_rotation_loop().await }
        });
        SchedulerHandle { scheduler: self, audit_task, rotation_task }
    }

    /// `tokio::time::interval`'s default `MissedTickBehavior::Delay` is the
    /// back-off here: a failing tick doesn't spin hot, it just waits for the
    /// next scheduled tick like any other tick would.
    async fn run_audit_flush_loop(&self) {
        let mut interval = tokio::time::interval(self.audit_flush_interval);
        loop {
            interval.tick().await;
            match self.audit.flush().await {
                Ok(flushed) if flushed > 0 => tracing::debug!(flushed, "audit buffer flushed"),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "audit flush failed, will retry next tick"),
            }
        }
    }

    async fn run_rotation_loop(&self) {
        let mut interval = tokio::time::interval(self.rotation_check_interval);
        loop {
            interval.tick().await;
            if let Err(err) = self.check_rotations().await {
                tracing::error!(error = %err, "secret rotation scan failed, will retry next tick");
            }
        }
    }

    async fn check_rotations(&self) -> Result<(), crate::domain::repository::RepositoryError> {
        let due = self.secrets.find_due_for_rotation().await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::info!(count = due.len(), "secrets due for rotation");
        for mut entry in due {
            match self.rotation.rotate(&entry).await {
                Ok(new_ciphertext) => {
                    entry.mark_rotated(new_ciphertext, Utc::now());
                    if let Err(err) = self.secrets.save(&entry).await {
                        tracing::error!(error = %err, secret_id = ?entry.id, "failed to persist rotated secret");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, secret_id = ?entry.id, "secret rotation strategy failed, will retry next scan");
                }
            }
        }
        Ok(())
    }
}

pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    audit_task: JoinHandle<()>,
    rotation_task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Cancels both periodic tasks and runs one final audit flush to drain
    /// anything left buffered at shutdown (§4.15).
    pub async fn shutdown(self) {
        self.audit_task.abort();
        self.rotation_task.abort();
        if let Err(err) = self.scheduler.audit.flush().await {
            tracing::error!(error = %err, "final audit flush on shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::secret::SecretType;

    fn sample_entry() -> SecretVaultEntry {
        SecretVaultEntry::new(
            crate::domain::agent::SponsorId::new(),
            "openai".to_string(),
            vec![1, 2, 3, 4],
            SecretType::ApiKey,
            24 * 30,
        )
    }

    #[tokio::test]
    async fn logging_strategy_returns_ciphertext_unchanged() {
        let entry = sample_entry();
        let strategy = LoggingRotationStrategy;
        let result = strategy.rotate(&entry).await.expect("logging strategy never fails");
        assert_eq!(result, entry.ciphertext);
    }

    #[test]
    fn rotation_due_flag_round_trips_through_mark_rotated() {
        let mut entry = sample_entry();
        entry.last_rotated = Utc::now() - chrono::Duration::hours(24 * 31);
        assert!(entry.rotation_due(Utc::now()));
        entry.mark_rotated(vec![9, 9, 9], Utc::now());
        assert!(!entry.rotation_due(Utc::now()));
    }
}
