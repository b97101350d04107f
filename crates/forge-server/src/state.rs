//! Shared application state, the same shape as `ob-poc-web::state::AppState`:
//! one `Clone`-able struct carrying the pool and every shared service, handed
//! to axum as an `Extension`.

use crate::config::Environment;
use forge_artifact::ArtifactStore;
use forge_db::Database;
use forge_exec::ActionExecutor;
use forge_jobs::JobQueue;
use forge_rules::RuleEngine;
use forge_ws::SubscriptionHub;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub artifact_store: Arc<ArtifactStore>,
    pub db: Database,
    pub rules: Arc<RuleEngine>,
    pub executor: Arc<ActionExecutor>,
    pub hub: Arc<SubscriptionHub>,
    pub job_queue: Arc<JobQueue>,
    pub env: Environment,
}

impl AppState {
    pub fn is_dev(&self) -> bool {
        !self.env.is_production()
    }
}
