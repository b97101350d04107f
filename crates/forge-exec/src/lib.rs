//! The action-execution state machine: `spec.md` §4.11's twelve ordered
//! steps, modeled on `ob-workflow::engine::WorkflowEngine`'s explicit
//! step methods and `Result<_, ExecError>` propagation at every stage.
//!
//! `Received → Authed → Resolved → TxOpen → Locked(if upd/del) → AccessOK
//! → RulesOK → Mutated → Committed → Dispatched → Broadcast → Done`. Hook
//! dispatch and broadcast happen after commit and are fire-and-forget: a
//! failure there is logged, never rolled back, and never turns a
//! `Committed` action into a `Failed` one (`spec.md` §4.11).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forge_artifact::ArtifactStore;
use forge_db::Database;
use forge_emit::{Artifact, ArtifactAction, ArtifactEntity};
use forge_rules::{Env, RuleEngine, Value as RuleValue};
use forge_syntax::Operation;
use serde_json::{Map, Value as Json};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, serde::Serialize)]
pub struct MessageOut {
    pub code: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("authentication required")]
    AuthRequired,
    #[error("unknown action {0:?}")]
    ActionNotFound(String),
    #[error("row not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("rule rejected the request")]
    RuleRejected(MessageOut),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Db(#[from] forge_db::DbError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("rule evaluation error: {0}")]
    Rule(#[from] forge_rules::RuleError),
}

/// What the executor hands off once a mutation has committed. Enqueuing
/// and broadcasting happen outside the transaction boundary, so their
/// failure can never retroactively fail the action — they're reported as
/// ordinary trait-call results the caller logs, not propagated as
/// [`ExecError`].
#[derive(Clone, Debug)]
pub struct CommittedChange {
    pub entity: String,
    pub operation: Operation,
    pub row: Json,
}

#[async_trait]
pub trait HookDispatcher: Send + Sync {
    async fn enqueue(&self, job_name: &str, change: &CommittedChange);
}

#[async_trait]
pub trait ChangeBroadcaster: Send + Sync {
    async fn broadcast(&self, change: &CommittedChange);
}

/// A dispatcher/broadcaster that drops everything, for tests and for
/// dry-run tooling that only cares about the transactional outcome.
pub struct NoopSink;

#[async_trait]
impl HookDispatcher for NoopSink {
    async fn enqueue(&self, _job_name: &str, _change: &CommittedChange) {}
}

#[async_trait]
impl ChangeBroadcaster for NoopSink {
    async fn broadcast(&self, _change: &CommittedChange) {}
}

#[derive(Clone, Debug, Default)]
pub struct ActionInput {
    pub subject: Option<Uuid>,
    pub row_id: Option<Uuid>,
    pub fields: Map<String, Json>,
}

#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub row: Json,
    pub messages: Vec<MessageOut>,
}

pub struct ActionExecutor {
    artifact_store: Arc<ArtifactStore>,
    db: Database,
    rules: Arc<RuleEngine>,
    hooks: Arc<dyn HookDispatcher>,
    broadcaster: Arc<dyn ChangeBroadcaster>,
}

impl ActionExecutor {
    pub fn new(artifact_store: Arc<ArtifactStore>, db: Database, rules: Arc<RuleEngine>, hooks: Arc<dyn HookDispatcher>, broadcaster: Arc<dyn ChangeBroadcaster>) -> Self {
        Self { artifact_store, db, rules, hooks, broadcaster }
    }

    /// Run the full pipeline for an HTTP-originated action request.
    pub async fn execute(&self, action_name: &str, input: ActionInput) -> Result<ActionOutcome, ExecError> {
        self.run(action_name, input, false).await
    }

    /// Same pipeline, skipping steps 1 (authenticate) and 3
    /// (auto-populate) and step 6 (access evaluation) — a webhook is a
    /// system operation, not a user one (`spec.md` §4.11).
    pub async fn execute_from_webhook(&self, action_name: &str, input: ActionInput) -> Result<ActionOutcome, ExecError> {
        self.run(action_name, input, true).await
    }

    async fn run(&self, action_name: &str, mut input: ActionInput, is_webhook: bool) -> Result<ActionOutcome, ExecError> {
        let artifact = self.artifact_store.artifact().await;
        let indices = self.artifact_store.indices().await;

        // 1. Authenticate.
        if !is_webhook && artifact.app.auth_mode != forge_syntax::AuthMode::None && input.subject.is_none() {
            return Err(ExecError::AuthRequired);
        }

        // 2. Resolve action.
        let action_idx = *indices.action_by_name.get(action_name).ok_or_else(|| ExecError::ActionNotFound(action_name.to_string()))?;
        let (_, action) = artifact.actions.iter().nth(action_idx).expect("index built from this artifact");
        let target_entity_name = action.target_entity.clone().unwrap_or_else(|| action.input_entity.clone());
        let entity = artifact.entities.get(&target_entity_name).expect("action target entity resolved at compile time");

        // 3. Auto-populate.
        if !is_webhook && action.operation == Operation::Create {
            if let Some(subject) = input.subject {
                for field in &action.auto_populate_fields {
                    input.fields.entry(field.clone()).or_insert_with(|| Json::String(subject.to_string()));
                }
            }
        }

        // 4. Begin transaction, subject-scoped.
        let mut tx = self.db.begin_as_subject(input.subject).await?;

        let result = self.run_in_transaction(&mut tx, &artifact, &indices, action, &target_entity_name, entity, &input, is_webhook).await;

        let committed_row = match result {
            Ok(row) => {
                // 9. Commit.
                tx.commit().await?;
                row
            }
            Err(err) => {
                tx.rollback().await.ok();
                return Err(err);
            }
        };

        let change = CommittedChange { entity: target_entity_name.clone(), operation: action.operation, row: committed_row.clone() };

        // 10. Dispatch hooks (fire-and-forget).
        if let Some(hook_indices) = indices.hooks_by_entity_operation.get(&(target_entity_name.clone(), action.operation)) {
            for &idx in hook_indices {
                let hook = &artifact.hooks[idx];
                for job_name in &hook.job_names {
                    self.hooks.enqueue(job_name, &change).await;
                }
            }
        }

        // 11. Broadcast.
        self.broadcaster.broadcast(&change).await;

        // 12. Respond.
        Ok(ActionOutcome { row: committed_row, messages: Vec::new() })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_in_transaction(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        artifact: &Artifact,
        indices: &forge_artifact::Indices,
        action: &ArtifactAction,
        target_entity_name: &str,
        entity: &ArtifactEntity,
        input: &ActionInput,
        is_webhook: bool,
    ) -> Result<Json, ExecError> {
        // 5. For update/delete: lock and load.
        let locked_row = if action.operation != Operation::Create {
            let id = input.row_id.ok_or_else(|| ExecError::Validation("missing row id".to_string()))?;
            Some(lock_and_load(tx, entity, id).await?)
        } else {
            None
        };

        // 6. Evaluate write access.
        if !is_webhook {
            if let Some(access) = artifact.access.get(target_entity_name) {
                let env = build_env(entity, locked_row.as_ref(), input);
                let allowed = self.rules.eval_bool(target_entity_name, &access.write_expr, &env)?;
                if !allowed {
                    return Err(ExecError::AccessDenied);
                }
            }
        }

        // 7. Evaluate rules, in artifact declaration order.
        if let Some(rule_indices) = indices.rules_by_entity_operation.get(&(target_entity_name.to_string(), action.operation)) {
            let env = build_env(entity, locked_row.as_ref(), input);
            for &idx in rule_indices {
                let rule = &artifact.rules[idx];
                let condition = self.rules.eval_bool(target_entity_name, &rule.condition_expr, &env)?;
                if forge_plan_rejects(rule.kind, condition) {
                    let message = artifact.messages.get(&rule.emit_code).cloned().unwrap_or(forge_emit::ArtifactMessage {
                        level: "error".to_string(),
                        default_text: rule.emit_code.clone(),
                    });
                    return Err(ExecError::RuleRejected(MessageOut { code: rule.emit_code.clone(), level: message.level, message: message.default_text }));
                }
            }
        }

        // 8. Execute mutation.
        execute_mutation(tx, entity, action, input, locked_row.as_ref()).await
    }
}

/// Mirrors `forge_plan::rejects` without taking a dependency on the
/// planner crate from the runtime's hot path — the rule kind/result
/// polarity rule is one line, duplicating it here keeps C11 independent
/// of C6 at runtime.
fn forge_plan_rejects(kind: forge_syntax::RuleKind, condition_result: bool) -> bool {
    match kind {
        forge_syntax::RuleKind::Forbid => condition_result,
        forge_syntax::RuleKind::Require => !condition_result,
    }
}

fn scalar_to_rule_value(ty: &str, json: &Json) -> RuleValue {
    if json.is_null() {
        return RuleValue::Null;
    }
    if ty == "bool" {
        return json.as_bool().map(RuleValue::Bool).unwrap_or(RuleValue::Null);
    }
    if ty == "int" {
        return json.as_i64().map(RuleValue::Int).unwrap_or(RuleValue::Null);
    }
    if ty == "float" {
        return json.as_f64().map(RuleValue::Float).unwrap_or(RuleValue::Null);
    }
    if ty == "uuid" {
        return json.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(RuleValue::Uuid).unwrap_or(RuleValue::Null);
    }
    if ty == "time" {
        return json
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| RuleValue::Time(dt.with_timezone(&Utc)))
            .unwrap_or(RuleValue::Null);
    }
    // strings and enum<...> values
    json.as_str().map(|s| RuleValue::String(s.to_string())).unwrap_or(RuleValue::Null)
}

/// Binds the rule evaluator's environment for one row. Create actions have
/// no existing row, so every field comes from the input. Update and delete
/// actions bind to the locked pre-image only: `forbid`/`require` and the
/// write-access check reason about the row as it stands, not the
/// hypothetical result of applying the patch (`spec.md` §4.11 step 7).
/// Evaluating against the post-image needs an explicit per-rule opt-in
/// (§9's open question); this implementation carries no such annotation, so
/// the patch never reaches the environment once a row is locked.
fn build_env(entity: &ArtifactEntity, locked_row: Option<&Json>, input: &ActionInput) -> Env {
    let mut env = Env::new();
    for field in &entity.fields {
        let value = match locked_row {
            Some(row) => row.get(&field.name).cloned().unwrap_or(Json::Null),
            None => input.fields.get(&field.name).cloned().unwrap_or(Json::Null),
        };
        env.insert(field.name.clone(), scalar_to_rule_value(&field.ty, &value));
    }
    if let Some(subject) = input.subject {
        env.insert("user".to_string(), RuleValue::Uuid(subject));
    }
    env
}

async fn lock_and_load(tx: &mut Transaction<'_, Postgres>, entity: &ArtifactEntity, id: Uuid) -> Result<Json, ExecError> {
    let sql = format!("SELECT * FROM {} WHERE id = $1 FOR UPDATE", entity.table);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
    match row {
        Some(row) => Ok(row_to_json(&row, entity)?),
        None => Err(ExecError::NotFound),
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

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    ty: &str,
    value: &Json,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    if value.is_null() {
        return query.bind(Option::<String>::None);
    }
    match ty {
        "bool" => query.bind(value.as_bool()),
        "int" => query.bind(value.as_i64()),
        "float" => query.bind(value.as_f64()),
        "uuid" => query.bind(value.as_str().and_then(|s| Uuid::parse_str(s).ok())),
        "time" => query.bind(value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))),
        _ => query.bind(value.as_str().map(|s| s.to_string())),
    }
}

/// Resolves the concrete value the planner's fixed-column statement needs
/// for one field: whatever the input supplied, else the dialect default
/// computed in-process (since a parameterized `INSERT` cannot fall back to
/// a SQL-side `DEFAULT` once the column is listed explicitly), else the
/// pre-existing row value for an update, else an error if the field is
/// required and still missing.
fn resolve_field_value(field: &forge_emit::ArtifactField, input: &ActionInput, existing: Option<&Json>) -> Result<Json, ExecError> {
    if let Some(value) = input.fields.get(&field.name) {
        return Ok(value.clone());
    }
    if let Some(existing) = existing {
        if let Some(value) = existing.get(&field.name) {
            return Ok(value.clone());
        }
    }
    if field.name == "id" {
        return Ok(Json::String(Uuid::new_v4().to_string()));
    }
    if field.name == "created_at" || field.name == "updated_at" {
        return Ok(Json::String(Utc::now().to_rfc3339()));
    }
    if field.nullable {
        return Ok(Json::Null);
    }
    Err(ExecError::Validation(format!("missing required field '{}'", field.name)))
}

async fn execute_mutation(
    tx: &mut Transaction<'_, Postgres>,
    entity: &ArtifactEntity,
    action: &ArtifactAction,
    input: &ActionInput,
    existing: Option<&Json>,
) -> Result<Json, ExecError> {
    let sql = action_sql_for(entity, action.operation);
    let row = match action.operation {
        Operation::Create => {
            let mut query = sqlx::query(&sql);
            for field in &entity.fields {
                let value = resolve_field_value(field, input, existing)?;
                query = bind_value(query, &field.ty, &value);
            }
            query.fetch_optional(&mut **tx).await?
        }
        Operation::Update => {
            let id = input.row_id.ok_or_else(|| ExecError::Validation("missing row id".to_string()))?;
            let mut query = sqlx::query(&sql).bind(id);
            for field in entity.fields.iter().filter(|f| f.name != "id" && f.name != "created_at") {
                let value = resolve_field_value(field, input, existing)?;
                query = bind_value(query, &field.ty, &value);
            }
            query.fetch_optional(&mut **tx).await?
        }
        Operation::Delete => {
            let id = input.row_id.ok_or_else(|| ExecError::Validation("missing row id".to_string()))?;
            sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?
        }
    };
    match row {
        Some(row) => Ok(row_to_json(&row, entity)?),
        None => Err(ExecError::NotFound),
    }
}

fn action_sql_for(entity: &ArtifactEntity, operation: Operation) -> String {
    match operation {
        Operation::Create => {
            let columns: Vec<&str> = entity.fields.iter().map(|f| f.name.as_str()).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
            format!("INSERT INTO {} ({}) VALUES ({}) RETURNING *;", entity.table, columns.join(", "), placeholders.join(", "))
        }
        Operation::Update => {
            let settable: Vec<&str> = entity.fields.iter().map(|f| f.name.as_str()).filter(|n| *n != "id" && *n != "created_at").collect();
            let assignments: Vec<String> = settable.iter().enumerate().map(|(i, name)| format!("{name} = ${}", i + 2)).collect();
            format!("UPDATE {} SET {} WHERE id = $1 RETURNING *;", entity.table, assignments.join(", "))
        }
        Operation::Delete => format!("DELETE FROM {} WHERE id = $1 RETURNING *;", entity.table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_env_binds_updates_to_the_locked_pre_image() {
        let entity = ArtifactEntity {
            table: "tickets".to_string(),
            primary_key: "id".to_string(),
            fields: vec![forge_emit::ArtifactField {
                name: "status".to_string(),
                ty: "string".to_string(),
                nullable: false,
                default: None,
                unique: false,
                constraints: forge_emit::ArtifactFieldConstraint { unique: false, max_length: None },
            }],
        };
        let locked = Json::Object(Map::from_iter([("status".to_string(), Json::String("open".to_string()))]));
        let mut fields = Map::new();
        fields.insert("status".to_string(), Json::String("closed".to_string()));
        let input = ActionInput { subject: None, row_id: None, fields };
        let env = build_env(&entity, Some(&locked), &input);
        assert_eq!(env.get("status"), Some(&RuleValue::String("open".to_string())));
    }

    #[test]
    fn build_env_binds_creates_to_the_input() {
        let entity = ArtifactEntity {
            table: "tickets".to_string(),
            primary_key: "id".to_string(),
            fields: vec![forge_emit::ArtifactField {
                name: "status".to_string(),
                ty: "string".to_string(),
                nullable: false,
                default: None,
                unique: false,
                constraints: forge_emit::ArtifactFieldConstraint { unique: false, max_length: None },
            }],
        };
        let mut fields = Map::new();
        fields.insert("status".to_string(), Json::String("open".to_string()));
        let input = ActionInput { subject: None, row_id: None, fields };
        let env = build_env(&entity, None, &input);
        assert_eq!(env.get("status"), Some(&RuleValue::String("open".to_string())));
    }

    #[test]
    fn forbid_rejects_when_true_require_rejects_when_false() {
        assert!(forge_plan_rejects(forge_syntax::RuleKind::Forbid, true));
        assert!(!forge_plan_rejects(forge_syntax::RuleKind::Forbid, false));
        assert!(forge_plan_rejects(forge_syntax::RuleKind::Require, false));
        assert!(!forge_plan_rejects(forge_syntax::RuleKind::Require, true));
    }

    #[test]
    fn resolve_field_value_generates_a_fresh_id_when_absent() {
        let field = forge_emit::ArtifactField {
            name: "id".to_string(),
            ty: "uuid".to_string(),
            nullable: false,
            default: None,
            unique: true,
            constraints: forge_emit::ArtifactFieldConstraint { unique: true, max_length: None },
        };
        let input = ActionInput::default();
        let value = resolve_field_value(&field, &input, None).unwrap();
        assert!(Uuid::parse_str(value.as_str().unwrap()).is_ok());
    }

    #[test]
    fn resolve_field_value_errors_on_missing_required_field() {
        let field = forge_emit::ArtifactField {
            name: "title".to_string(),
            ty: "string".to_string(),
            nullable: false,
            default: None,
            unique: false,
            constraints: forge_emit::ArtifactFieldConstraint { unique: false, max_length: None },
        };
        let input = ActionInput::default();
        assert!(matches!(resolve_field_value(&field, &input, None), Err(ExecError::Validation(_))));
    }
}
