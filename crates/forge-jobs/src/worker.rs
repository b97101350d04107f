//! The bounded worker pool that drains [`JobQueue`]: needs-path resolution,
//! the capability sandbox gate, retry with backoff, and dead-lettering
//! (`spec.md` §4.12).

use crate::provider::{ProviderError, ProviderRegistry};
use crate::queue::{backoff_for_attempt, JobQueue, JobRecord, JobStatus};
use chrono::{DateTime, Utc};
use forge_artifact::ArtifactStore;
use forge_emit::{Artifact, ArtifactEntity};
use forge_rules::{Env, RuleEngine, Value as RuleValue};
use forge_syntax::Cardinality;
use serde_json::{Map, Value as Json};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("needs-path segment {0:?} is not a relation on entity {1:?}")]
    UnknownRelationSegment(String, String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Rule(#[from] forge_rules::RuleError),
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub provider_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { worker_count: 10, provider_timeout: Duration::from_secs(30) }
    }
}

fn column_value<T>(row: &PgRow, name: &str, nullable: bool) -> Result<Json, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + serde::Serialize,
{
    if nullable {
        let value: Option<T> = row.try_get(name)?;
        Ok(serde_json::to_value(value).unwrap_or(Json::Null))
    } else {
        let value: T = row.try_get(name)?;
        Ok(serde_json::to_value(value).unwrap_or(Json::Null))
    }
}

fn row_to_json(row: &PgRow, entity: &ArtifactEntity) -> Result<Json, sqlx::Error> {
    let mut map = Map::new();
    for field in &entity.fields {
        let value = match field.ty.as_str() {
            "bool" => column_value::<bool>(row, &field.name, field.nullable)?,
            "int" => column_value::<i64>(row, &field.name, field.nullable)?,
            "float" => column_value::<f64>(row, &field.name, field.nullable)?,
            "uuid" => column_value::<Uuid>(row, &field.name, field.nullable)?,
            "time" => column_value::<DateTime<Utc>>(row, &field.name, field.nullable)?,
            _ => column_value::<String>(row, &field.name, field.nullable)?,
        };
        map.insert(field.name.clone(), value);
    }
    Ok(Json::Object(map))
}

/// Walks a job's `needs_path` through the database, one relation segment at
/// a time: single-valued segments are FK lookups, many-valued segments fan
/// out to a collection (`spec.md` §4.12 "Needs resolution").
pub struct NeedsResolver {
    pool: PgPool,
}

impl NeedsResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one(&self, entity: &ArtifactEntity, id: Uuid) -> Result<Option<Json>, JobError> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", entity.table);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| row_to_json(&r, entity)).transpose().map_err(JobError::from)
    }

    async fn fetch_many_by_fk(&self, entity: &ArtifactEntity, fk_column: &str, owner_id: Uuid) -> Result<Vec<Json>, JobError> {
        let sql = format!("SELECT * FROM {} WHERE {} = $1", entity.table, fk_column);
        let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&self.pool).await?;
        rows.iter().map(|r| row_to_json(r, entity)).collect::<Result<Vec<_>, _>>().map_err(JobError::from)
    }

    /// Resolve one job's data dependency starting from the seed row that
    /// triggered the hook, applying `needs_filter_expr` at the final step.
    pub async fn resolve(&self, artifact: &Artifact, rules: &RuleEngine, job: &forge_emit::ArtifactJob, seed_row: Json) -> Result<Vec<Json>, JobError> {
        let Some(path) = &job.needs_path else {
            return Ok(vec![seed_row]);
        };

        let mut rows = vec![seed_row];
        let mut current_entity_name = job.input_entity.clone();

        for segment in path {
            let relation = artifact
                .relations
                .iter()
                .find(|r| r.owner_entity == current_entity_name && r.name == *segment)
                .ok_or_else(|| JobError::UnknownRelationSegment(segment.clone(), current_entity_name.clone()))?;
            let target = artifact
                .entities
                .get(&relation.target_entity)
                .ok_or_else(|| JobError::UnknownRelationSegment(segment.clone(), current_entity_name.clone()))?;

            let mut next_rows = Vec::new();
            for row in &rows {
                match relation.cardinality {
                    Cardinality::One => {
                        let fk_value = row.get(relation.fk_column.as_str()).and_then(Json::as_str).and_then(|s| Uuid::parse_str(s).ok());
                        if let Some(id) = fk_value {
                            if let Some(found) = self.fetch_one(target, id).await? {
                                next_rows.push(found);
                            }
                        }
                    }
                    Cardinality::Many => {
                        let owner_id = row.get("id").and_then(Json::as_str).and_then(|s| Uuid::parse_str(s).ok());
                        if let Some(owner_id) = owner_id {
                            next_rows.extend(self.fetch_many_by_fk(target, &relation.fk_column, owner_id).await?);
                        }
                    }
                }
            }
            rows = next_rows;
            current_entity_name = relation.target_entity.clone();
        }

        if let Some(filter) = &job.needs_filter_expr {
            let final_entity = artifact.entities.get(&current_entity_name);
            rows.retain(|row| {
                let mut env = Env::new();
                if let (Some(entity), Json::Object(map)) = (final_entity, row) {
                    for field in &entity.fields {
                        let value = map.get(&field.name).cloned().unwrap_or(Json::Null);
                        env.insert(field.name.clone(), json_to_rule_value(&field.ty, &value));
                    }
                }
                rules.eval_bool(&current_entity_name, filter, &env).unwrap_or(false)
            });
        }

        Ok(rows)
    }
}

fn json_to_rule_value(ty: &str, json: &Json) -> RuleValue {
    if json.is_null() {
        return RuleValue::Null;
    }
    match ty {
        "bool" => json.as_bool().map(RuleValue::Bool).unwrap_or(RuleValue::Null),
        "int" => json.as_i64().map(RuleValue::Int).unwrap_or(RuleValue::Null),
        "float" => json.as_f64().map(RuleValue::Float).unwrap_or(RuleValue::Null),
        "uuid" => json.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(RuleValue::Uuid).unwrap_or(RuleValue::Null),
        "time" => json
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| RuleValue::Time(dt.with_timezone(&Utc)))
            .unwrap_or(RuleValue::Null),
        _ => json.as_str().map(|s| RuleValue::String(s.to_string())).unwrap_or(RuleValue::Null),
    }
}

/// Drains [`JobQueue`], dispatching each job's resolved data fan-out to the
/// registered provider for its declared capability.
pub struct JobWorkerPool {
    queue: Arc<JobQueue>,
    registry: Arc<ProviderRegistry>,
    artifact_store: Arc<ArtifactStore>,
    resolver: Arc<NeedsResolver>,
    rules: Arc<RuleEngine>,
    config: WorkerConfig,
}

impl JobWorkerPool {
    pub fn new(queue: Arc<JobQueue>, registry: Arc<ProviderRegistry>, artifact_store: Arc<ArtifactStore>, resolver: Arc<NeedsResolver>, rules: Arc<RuleEngine>, config: WorkerConfig) -> Self {
        Self { queue, registry, artifact_store, resolver, rules, config }
    }

    /// Spawn `config.worker_count` tasks draining the queue concurrently.
    /// Returns the `JoinSet` so the caller can hold or abort it on shutdown.
    pub fn spawn(self: Arc<Self>) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for worker_id in 0..self.config.worker_count {
            let pool = self.clone();
            set.spawn(async move { pool.run(worker_id).await });
        }
        set
    }

    async fn run(&self, worker_id: usize) {
        loop {
            match self.queue.dequeue() {
                Some(job) => self.process(job).await,
                None => tokio::time::sleep(Duration::from_millis(50)).await,
            }
            tracing::trace!(worker_id, "job worker idle poll");
        }
    }

    async fn process(&self, mut job: JobRecord) {
        job.attempt += 1;
        job.status = JobStatus::Running;
        tracing::info!(job_id = %job.id, job_name = %job.name, attempt = job.attempt, "job.started");

        match self.execute(&job).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, job_name = %job.name, "job.completed");
            }
            Err(ProviderError::Permanent(reason)) => {
                job.status = JobStatus::Dead;
                job.last_error = Some(reason.clone());
                tracing::warn!(job_id = %job.id, job_name = %job.name, reason = %reason, "job.failed (permanent)");
                self.queue.dead_letter(job);
            }
            Err(ProviderError::Transient(reason)) => {
                job.last_error = Some(reason.clone());
                tracing::warn!(job_id = %job.id, job_name = %job.name, reason = %reason, attempt = job.attempt, "job.failed (transient)");
                if job.attempt >= job.max_attempts {
                    job.status = JobStatus::Dead;
                    self.queue.dead_letter(job);
                } else {
                    job.status = JobStatus::Failed;
                    let delay = backoff_for_attempt(job.attempt);
                    let queue = Arc::clone(&self.queue);
                    let requeued = job.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.requeue(requeued);
                    });
                }
            }
        }
    }

    async fn execute(&self, job: &JobRecord) -> Result<(), ProviderError> {
        let artifact = self.artifact_store.artifact().await;
        let Some(declared) = artifact.jobs.get(&job.name) else {
            return Err(ProviderError::Permanent(format!("unknown job {:?}", job.name)));
        };

        // Capability gate: a job may only invoke capabilities its own
        // declaration lists (`spec.md` §4.12). `job.allowed_capabilities` is
        // the snapshot captured at enqueue time; cross-check against what's
        // still declared in the live artifact in case of a hot reload.
        for capability in &job.allowed_capabilities {
            if !declared.capabilities.iter().any(|c| c == capability) {
                return Err(ProviderError::Permanent(format!("capability {capability:?} not declared for job {:?} (sandbox violation)", job.name)));
            }
        }

        let rows = self
            .resolver
            .resolve(&artifact, &self.rules, declared, job.input_data.clone())
            .await
            .map_err(|e| ProviderError::Permanent(e.to_string()))?;

        for capability in &job.allowed_capabilities {
            let provider = self.registry.get(capability).ok_or_else(|| ProviderError::Permanent(format!("no provider registered for capability {capability:?}")))?;
            for row in &rows {
                let call = provider.execute(capability, row);
                match tokio::time::timeout(self.config.provider_timeout, call).await {
                    Ok(result) => result?,
                    Err(_) => return Err(ProviderError::Transient(format!("capability {capability:?} timed out"))),
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RecordingProvider;
    use forge_emit::compile_source;

    async fn build_store(src: &str) -> Arc<ArtifactStore> {
        // ArtifactStore::open reads from a path; tests stage a tempfile.
        let (artifact, diags) = compile_source("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        std::fs::write(&path, forge_emit::artifact_json(&artifact.unwrap()).unwrap()).unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the test's duration
        Arc::new(ArtifactStore::open(&path).await.unwrap())
    }

    #[tokio::test]
    async fn capability_gate_rejects_an_undeclared_capability() {
        let src = r#"
            entity Ticket { title: string }
            job notify_author { input: Ticket, effect: email.send }
        "#;
        let store = build_store(src).await;
        let queue = Arc::new(JobQueue::new(10));
        let registry = Arc::new(ProviderRegistry::new());
        let rules = Arc::new(RuleEngine::new());
        // A fake pool handle: needs-path resolution is never reached because
        // this job has no needs_path, so the pool is never queried.
        let resolver = Arc::new(NeedsResolver { pool: PgPool::connect_lazy("postgres://localhost/does_not_matter").unwrap() });
        let worker_pool = JobWorkerPool::new(queue.clone(), registry, store, resolver, rules, WorkerConfig::default());

        let job = JobRecord::new("notify_author", Json::Null, 3, vec!["http.post".to_string()]);
        let err = worker_pool.execute(&job).await.unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[tokio::test]
    async fn a_declared_capability_dispatches_to_its_provider() {
        let src = r#"
            entity Ticket { title: string }
            job notify_author { input: Ticket, effect: email.send }
        "#;
        let store = build_store(src).await;
        let queue = Arc::new(JobQueue::new(10));
        let mut registry = ProviderRegistry::new();
        let provider = Arc::new(RecordingProvider::new("email", "email.send"));
        registry.register(provider.clone());
        let rules = Arc::new(RuleEngine::new());
        let resolver = Arc::new(NeedsResolver { pool: PgPool::connect_lazy("postgres://localhost/does_not_matter").unwrap() });
        let worker_pool = JobWorkerPool::new(queue, Arc::new(registry), store, resolver, rules, WorkerConfig::default());

        let job = JobRecord::new("notify_author", serde_json::json!({"author_id": "x"}), 3, vec!["email.send".to_string()]);
        worker_pool.execute(&job).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }
}
