//! `GET /api/entities/{name}[/{id}]` (`spec.md` §4.11/§6): direct,
//! access-filtered reads are always on. Direct mutation is development-only
//! per the Open Question resolved in `spec.md` §9 — "direct mutations go
//! only through actions; the runtime historically exposes raw CRUD too, so
//! this specification keeps it but confines it to development" — and
//! returns 404 in production rather than `403`, so presence of the route
//! itself is never leaked.

use crate::auth::Subject;
use crate::error::ApiError;
use crate::rows::row_to_json;
use crate::rules_env::row_env;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use forge_exec::CommittedChange;
use forge_syntax::Operation;
use serde_json::Value as Json_;
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 50;

pub async fn list_entity(
    State(state): State<AppState>,
    Path(name): Path<String>,
    subject: Option<Extension<Subject>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifact = state.artifact_store.artifact().await;
    let entity = artifact.entities.get(&name).ok_or_else(ApiError::not_found)?;
    let access = artifact.access.get(&name);
    let subject_id = subject.map(|Extension(Subject(id))| id);

    let mut tx = state.db.begin_as_subject(subject_id).await.map_err(|_| ApiError::not_found())?;
    let where_clause = access.map(|a| a.read_sql.clone()).unwrap_or_else(|| "true".to_string());
    let sql = format!("SELECT * FROM {} WHERE {} ORDER BY id LIMIT {}", entity.table, where_clause, DEFAULT_LIMIT);
    let rows = sqlx::query(&sql)
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;
    tx.rollback().await.ok();

    let data: Result<Vec<_>, _> = rows.iter().map(|row| row_to_json(row, entity)).collect();
    let data = data.map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR", err.to_string()))?;
    Ok(Json(serde_json::json!({ "status": "ok", "data": data, "messages": [] })))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, Uuid)>,
    subject: Option<Extension<Subject>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifact = state.artifact_store.artifact().await;
    let entity = artifact.entities.get(&name).ok_or_else(ApiError::not_found)?;
    let access = artifact.access.get(&name);
    let subject_id = subject.map(|Extension(Subject(id))| id);

    let mut tx = state.db.begin_as_subject(subject_id).await.map_err(|_| ApiError::not_found())?;
    let where_clause = access.map(|a| a.read_sql.clone()).unwrap_or_else(|| "true".to_string());
    let sql = format!("SELECT * FROM {} WHERE id = $1 AND {}", entity.table, where_clause);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;
    tx.rollback().await.ok();

    let row = row.ok_or_else(ApiError::not_found)?;
    let data = row_to_json(&row, entity).map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR", err.to_string()))?;
    Ok(Json(serde_json::json!({ "status": "ok", "data": data, "messages": [] })))
}

/// Raw insert, bypassing action auto-populate/hooks but not rules or write
/// access — development tooling only, never the canonical write path.
pub async fn create_entity(
    State(state): State<AppState>,
    Path(name): Path<String>,
    subject: Option<Extension<Subject>>,
    Json(fields): Json<serde_json::Map<String, Json_>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.is_dev() {
        return Err(ApiError::dev_only());
    }
    let artifact = state.artifact_store.artifact().await;
    let entity = artifact.entities.get(&name).ok_or_else(ApiError::not_found)?;
    let subject_id = subject.map(|Extension(Subject(id))| id);

    let env = row_env(&artifact, &name, &Json_::Object(fields.clone()), subject_id);
    if let Some(access) = artifact.access.get(&name) {
        let allowed = state.rules.eval_bool(&name, &access.write_expr, &env).unwrap_or(false);
        if !allowed {
            return Err(ApiError::not_found());
        }
    }

    let mut tx = state.db.begin_as_subject(subject_id).await.map_err(|_| ApiError::not_found())?;
    let columns: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let sql = format!("INSERT INTO {} ({}) VALUES ({}) RETURNING *", entity.table, columns.join(", "), placeholders.join(", "));
    let mut query = sqlx::query(&sql);
    for column in &columns {
        query = query.bind(fields.get(*column).cloned().unwrap_or(Json_::Null));
    }
    let row = query
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, "INSERT_FAILED", err.to_string()))?;
    let data = row_to_json(&row, entity).map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR", err.to_string()))?;
    tx.commit().await.map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;

    state.hub.broadcast(&CommittedChange { entity: name, operation: Operation::Create, row: data.clone() }).await;
    Ok(Json(serde_json::json!({ "status": "ok", "data": data, "messages": [] })))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, Uuid)>,
    subject: Option<Extension<Subject>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.is_dev() {
        return Err(ApiError::dev_only());
    }
    let artifact = state.artifact_store.artifact().await;
    let entity = artifact.entities.get(&name).ok_or_else(ApiError::not_found)?;
    let subject_id = subject.map(|Extension(Subject(id))| id);

    let mut tx = state.db.begin_as_subject(subject_id).await.map_err(|_| ApiError::not_found())?;
    let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING *", entity.table);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;
    let row = row.ok_or_else(ApiError::not_found)?;
    let data = row_to_json(&row, entity).map_err(|err| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR", err.to_string()))?;
    tx.commit().await.map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;

    state.hub.broadcast(&CommittedChange { entity: name, operation: Operation::Delete, row: data.clone() }).await;
    Ok(Json(serde_json::json!({ "status": "ok", "data": data, "messages": [] })))
}
