//! Adapts the action executor's post-commit [`forge_exec::HookDispatcher`]
//! seam onto this crate's [`JobQueue`] (`spec.md` §4.11 step 10 / §4.12).

use crate::queue::{JobQueue, JobRecord};
use async_trait::async_trait;
use forge_artifact::ArtifactStore;
use forge_exec::{CommittedChange, HookDispatcher};
use std::sync::Arc;

/// Retries per job default to five attempts; an author-facing per-job
/// override is not part of the artifact schema (`spec.md` §3 "Runtime
/// artifact") so every job shares this ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub struct HookQueueDispatcher {
    queue: Arc<JobQueue>,
    artifact_store: Arc<ArtifactStore>,
}

impl HookQueueDispatcher {
    pub fn new(queue: Arc<JobQueue>, artifact_store: Arc<ArtifactStore>) -> Self {
        Self { queue, artifact_store }
    }
}

#[async_trait]
impl HookDispatcher for HookQueueDispatcher {
    async fn enqueue(&self, job_name: &str, change: &CommittedChange) {
        let artifact = self.artifact_store.artifact().await;
        let Some(declared) = artifact.jobs.get(job_name) else {
            tracing::warn!(job_name, "hook referenced a job absent from the live artifact, dropping");
            return;
        };
        let job = JobRecord::new(job_name, change.row.clone(), DEFAULT_MAX_ATTEMPTS, declared.capabilities.clone());
        if let Err(err) = self.queue.enqueue(job) {
            tracing::warn!(job_name, error = %err, "job queue overflow, hook dispatch dropped");
        }
    }
}
