// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Composition root: builds every C1-C17 component from a [`ProxyConfig`]
//! and serves the HTTP surface alongside the background scheduler.
//!
//! This is the one place that knows about every concrete repository and
//! infrastructure adapter; everything above it (the pipeline, the
//! application services) only depends on the trait objects this module
//! wires together.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use aegis_core::application::audit_service::AuditService;
use aegis_core::application::config::{ProxyConfig, StorageConfig};
use aegis_core::application::forensic_exporter::ForensicExporter;
use aegis_core::application::hitl_gateway::HitlGateway;
use aegis_core::application::identity_service::IdentityService;
use aegis_core::application::permission_cache::PermissionCache;
use aegis_core::application::pipeline::ExecutionPipeline;
use aegis_core::application::scheduler::{LoggingRotationStrategy, Scheduler};
use aegis_core::application::wallet_service::WalletService;
use aegis_core::domain::repository::{
    AgentRepository, AuditRepository, BehaviorRepository, ExportLedgerRepository, HitlRepository, PermissionRepository,
    SecretRepository, SnapshotRepository, WalletRepository,
};
use aegis_core::infrastructure::anomaly::AnomalyDetector;
use aegis_core::infrastructure::circuit_breaker::CircuitBreaker;
use aegis_core::infrastructure::crypto::Cipher;
use aegis_core::infrastructure::ephemeral_store::EphemeralStore;
use aegis_core::infrastructure::export_sink::ExportSink;
use aegis_core::infrastructure::jit_broker::JitBroker;
use aegis_core::infrastructure::policy_client::PolicyEngineClient;
use aegis_core::infrastructure::rate_limiter::RateLimiter;
use aegis_core::infrastructure::repositories::{
    in_memory, postgres_agent, postgres_audit, postgres_behavior, postgres_export_ledger, postgres_hitl, postgres_permission,
    postgres_secret, postgres_snapshot, postgres_wallet,
};
use aegis_core::infrastructure::ssrf_guard::SsrfGuard;
use aegis_core::infrastructure::tsa_client::TsaClient;
use aegis_core::infrastructure::webhook::WebhookClient;
use aegis_core::presentation::api::{self, AppState};

#[cfg(unix)]
const PID_FILE_CANDIDATES: &[&str] = &["/var/run/aegis/aegis.pid", "/tmp/aegis.pid"];

/// Everything the HTTP surface and the scheduler need, already assembled.
pub struct AppContext {
    pub state: Arc<AppState>,
    pub scheduler: Arc<Scheduler>,
    pub exporter: Arc<ForensicExporter>,
    pub bind_addr: String,
}

async fn build_repositories(config: &ProxyConfig) -> Result<Repositories> {
    match &config.storage {
        StorageConfig::InMemory => Ok(Repositories {
            agents: Arc::new(in_memory::InMemoryAgentRepository::new()),
            permissions: Arc::new(in_memory::InMemoryPermissionRepository::new()),
            wallets: Arc::new(in_memory::InMemoryWalletRepository::new()),
            secrets: Arc::new(in_memory::InMemorySecretRepository::new()),
            audit: Arc::new(in_memory::InMemoryAuditRepository::new()),
            hitl: Arc::new(in_memory::InMemoryHitlRepository::new()),
            behavior: Arc::new(in_memory::InMemoryBehaviorRepository::new()),
            snapshots: Arc::new(in_memory::InMemorySnapshotRepository::new()),
            export_ledger: Arc::new(in_memory::InMemoryExportLedgerRepository::new()),
        }),
        StorageConfig::Postgres { connection_string } => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(connection_string)
                .await
                .context("failed to connect to Postgres")?;
            Ok(Repositories {
                agents: Arc::new(postgres_agent::PostgresAgentRepository::new(pool.clone())),
                permissions: Arc::new(postgres_permission::PostgresPermissionRepository::new(pool.clone())),
                wallets: Arc::new(postgres_wallet::PostgresWalletRepository::new(pool.clone())),
                secrets: Arc::new(postgres_secret::PostgresSecretRepository::new(pool.clone())),
                audit: Arc::new(postgres_audit::PostgresAuditRepository::new(pool.clone())),
                hitl: Arc::new(postgres_hitl::PostgresHitlRepository::new(pool.clone())),
                behavior: Arc::new(postgres_behavior::PostgresBehaviorRepository::new(pool.clone())),
                snapshots: Arc::new(postgres_snapshot::PostgresSnapshotRepository::new(pool.clone())),
                export_ledger: Arc::new(postgres_export_ledger::PostgresExportLedgerRepository::new(pool)),
            })
        }
    }
}

struct Repositories {
    agents: Arc<dyn AgentRepository>,
    permissions: Arc<dyn PermissionRepository>,
    wallets: Arc<dyn WalletRepository>,
    secrets: Arc<dyn SecretRepository>,
    audit: Arc<dyn AuditRepository>,
    hitl: Arc<dyn HitlRepository>,
    behavior: Arc<dyn BehaviorRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    export_ledger: Arc<dyn ExportLedgerRepository>,
}

pub async fn bootstrap(config: ProxyConfig) -> Result<AppContext> {
    config.validate().context("invalid configuration")?;

    let repos = build_repositories(&config).await?;
    let store = EphemeralStore::connect(&config.redis_url)
        .await
        .context("failed to connect to the ephemeral store")?;
    let master_key = config.resolve_master_key().context("failed to resolve master key")?;
    let cipher = Cipher::new(master_key);

    let identity = Arc::new(IdentityService::new(repos.agents.clone()));
    let permissions = Arc::new(PermissionCache::new(store.clone(), repos.permissions.clone()));
    let wallets = Arc::new(WalletService::new(repos.wallets.clone()));
    let anomaly = Arc::new(AnomalyDetector::new(store.clone()));
    let circuit_breaker = Arc::new(CircuitBreaker::new(store.clone()));
    let policy_client = Arc::new(PolicyEngineClient::new(config.policy_engine_url.clone()));
    let webhook = Arc::new(WebhookClient::new(config.webhook_secret.clone().unwrap_or_default()));
    let hitl = Arc::new(HitlGateway::new(repos.hitl.clone(), webhook));
    let jit = Arc::new(JitBroker::new(store.clone(), cipher));
    let ssrf_guard = Arc::new(SsrfGuard::new());
    let audit = Arc::new(AuditService::new(store.clone(), repos.audit.clone()));
    let export_sink = ExportSink::new(&config.export_sink.to_sink_config()).context("failed to initialize export sink")?;
    let export_sink_backend = match &config.export_sink {
        aegis_core::application::config::ExportSinkSettings::LocalFilesystem { .. } => "local_filesystem",
        aegis_core::application::config::ExportSinkSettings::S3 { .. } => "s3",
    };
    let tsa = config.tsa_endpoint.clone().map(TsaClient::new);
    let exporter = Arc::new(ForensicExporter::new(
        repos.audit.clone(),
        repos.export_ledger.clone(),
        store.clone(),
        export_sink,
        export_sink_backend,
        tsa,
    ));

    let pipeline = Arc::new(ExecutionPipeline::new(
        store.clone(),
        ssrf_guard,
        identity,
        permissions,
        wallets,
        anomaly,
        repos.behavior.clone(),
        circuit_breaker,
        policy_client,
        hitl.clone(),
        jit,
        repos.secrets.clone(),
        repos.snapshots.clone(),
        audit.clone(),
    ));

    let rotation = Arc::new(LoggingRotationStrategy);
    let scheduler = Arc::new(Scheduler::new(
        audit.clone(),
        repos.secrets.clone(),
        rotation,
        config.audit_flush_interval_secs,
        config.secret_rotation_check_interval_secs,
    ));

    let rate_limiter = Arc::new(RateLimiter::new(store));
    let state = Arc::new(AppState {
        pipeline,
        hitl,
        rate_limiter,
        rate_limit_default_rpm: config.rate_limit_default_rpm,
        rate_limit_auth_rpm: config.rate_limit_auth_rpm,
    });

    Ok(AppContext { state, scheduler, exporter, bind_addr: config.bind_addr })
}

/// Runs the proxy in the foreground: binds the HTTP listener, spawns the
/// scheduler, and blocks until Ctrl-C or SIGTERM, draining the audit buffer
/// one final time before exiting (§4.15: the flush runs once more after the
/// periodic tasks are cancelled).
pub async fn run_foreground(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ProxyConfig::load_or_default(config_path).context("failed to load configuration")?;
    if let (Some(host), Some(port)) = (&host, port) {
        config.bind_addr = format!("{}:{}", host, port);
    } else if let Some(port) = port {
        if let Some((h, _)) = config.bind_addr.rsplit_once(':') {
            config.bind_addr = format!("{}:{}", h, port);
        }
    }

    let context = bootstrap(config).await?;
    let scheduler_handle = context.scheduler.clone().spawn();

    let addr: SocketAddr = context.bind_addr.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP listener")?;
    info!(%addr, "AEGIS proxy listening");

    let app = api::app(context.state);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, make_service).with_graceful_shutdown(shutdown_signal()).await.context("HTTP server error")?;

    info!("shutting down, draining audit buffer");
    scheduler_handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(unix)]
pub fn pid_file_path() -> PathBuf {
    for candidate in PID_FILE_CANDIDATES {
        let path = PathBuf::from(candidate);
        if let Some(parent) = path.parent() {
            if parent.exists() || std::fs::create_dir_all(parent).is_ok() {
                return path;
            }
        }
    }
    PathBuf::from("/tmp/aegis.pid")
}

#[cfg(unix)]
pub fn read_pid() -> Option<u32> {
    std::fs::read_to_string(pid_file_path()).ok()?.trim().parse().ok()
}

#[cfg(unix)]
pub fn write_pid(pid: u32) -> std::io::Result<()> {
    std::fs::write(pid_file_path(), pid.to_string())
}

#[cfg(unix)]
pub fn remove_pid_file() {
    let _ = std::fs::remove_file(pid_file_path());
}

#[cfg(unix)]
pub fn process_is_alive(pid: u32) -> bool {
    // Signal 0 performs no action but still validates the target exists
    // and is reachable from this process.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

pub async fn health_check(bind_addr: &str, timeout: Duration) -> bool {
    let url = format!("http://{}/healthz", bind_addr);
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    client.get(url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
}
