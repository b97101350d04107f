//! Wires the artifact loader (C8), rule evaluator (C9), database adapter
//! (C10), action executor (C11), job subsystem (C12), subscription hub
//! (C13), and migration runner (C14) into one axum HTTP + WebSocket
//! process — the runtime half of `spec.md`'s architecture, grounded in
//! `sem_os_server::main`'s startup sequence (connect pool, spawn background
//! dispatcher, bind, serve) and `ob-poc-web::state::AppState`'s shared-state
//! pattern.

pub mod auth;
pub mod config;
mod error;
pub mod handlers;
pub mod router;
mod rows;
mod rules_env;
pub mod state;

use config::RuntimeConfig;
use forge_artifact::ArtifactStore;
use forge_db::Database;
use forge_exec::ActionExecutor;
use forge_jobs::{HookQueueDispatcher, JobQueue, JobWorkerPool, NeedsResolver, ProviderRegistry, WorkerConfig};
use forge_rules::RuleEngine;
use forge_ws::SubscriptionHub;
use state::AppState;
use std::sync::Arc;

/// Default bound on concurrently queued jobs before a hook enqueue starts
/// being dropped (`spec.md` §4.12 "bounded").
const JOB_QUEUE_CAPACITY: usize = 1024;

pub async fn serve(cfg: RuntimeConfig) -> anyhow::Result<()> {
    let db = Database::connect(&cfg.database_url, 10).await?;
    forge_db::ensure_migration_ledger(db.pool()).await?;

    let artifact_store = Arc::new(ArtifactStore::open(cfg.artifact_path.clone()).await?);

    match forge_migrate::run_pending_migration(db.pool(), &artifact_store).await? {
        forge_migrate::MigrationOutcome::Applied { version, statement_count } => {
            tracing::info!(version = %version, statements = statement_count, "applied pending migration");
        }
        forge_migrate::MigrationOutcome::AlreadyApplied { version } => {
            tracing::info!(version = %version, "migration already applied");
        }
    }

    let rules = Arc::new(RuleEngine::new());
    let job_queue = Arc::new(JobQueue::new(JOB_QUEUE_CAPACITY));
    let hub = Arc::new(SubscriptionHub::new(artifact_store.clone(), rules.clone()));

    let provider_registry = Arc::new(ProviderRegistry::new());
    let needs_resolver = Arc::new(NeedsResolver::new(db.pool().clone()));
    let worker_pool = Arc::new(JobWorkerPool::new(
        job_queue.clone(),
        provider_registry,
        artifact_store.clone(),
        needs_resolver,
        rules.clone(),
        WorkerConfig::default(),
    ));
    let _workers = worker_pool.spawn();

    let hooks = Arc::new(HookQueueDispatcher::new(job_queue.clone(), artifact_store.clone()));
    let executor = Arc::new(ActionExecutor::new(artifact_store.clone(), db.clone(), rules.clone(), hooks, hub.clone()));

    let state = AppState { artifact_store, db, rules, executor, hub, job_queue, env: cfg.env };
    let jwt_config = auth::JwtConfig::from_secret(cfg.jwt_secret.as_bytes());

    let app = router::build(state, jwt_config);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.port)).await?;
    tracing::info!(port = cfg.port, environment = ?cfg.env, "forge-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
