//! `GET /api/views/{name}` (`spec.md` §6, §4.13): the read path backing
//! both polled list requests and the initial WebSocket snapshot. Access is
//! enforced the same way the write path enforces it — a SQL predicate
//! fragment applied against the view's source table — and the view's own
//! `filter_expr`/projection are applied afterward in the rule evaluator,
//! exactly mirroring `forge-ws`'s broadcast-time re-projection.

use crate::auth::Subject;
use crate::error::ApiError;
use crate::rows::row_to_json;
use crate::rules_env::{project, row_env};
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use forge_rules::Value as RuleValue;
use std::collections::HashMap;
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Shared by the polled `GET /api/views/{name}` handler and the WebSocket
/// hub's initial snapshot (`spec.md` §4.13 `{op: snapshot}`).
pub async fn query_view_rows(
    state: &AppState,
    view_name: &str,
    subject_id: Option<Uuid>,
    params: &HashMap<String, String>,
) -> Result<Vec<serde_json::Value>, ApiError> {
    let artifact = state.artifact_store.artifact().await;
    let view = artifact.views.get(view_name).ok_or_else(ApiError::not_found)?;
    let entity = artifact.entities.get(&view.source_entity).ok_or_else(ApiError::not_found)?;
    let access = artifact.access.get(&view.source_entity);

    let limit = params.get("limit").and_then(|v| v.parse::<i64>().ok()).unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.get("offset").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0).max(0);

    let mut tx = state.db.begin_as_subject(subject_id).await.map_err(|_| ApiError::not_found())?;

    let where_clause = access.map(|a| a.read_sql.clone()).unwrap_or_else(|| "true".to_string());
    let sql = format!("SELECT * FROM {} WHERE {} ORDER BY id LIMIT $1 OFFSET $2", entity.table, where_clause);
    let rows = sqlx::query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| ApiError::new(axum::http::StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", err.to_string()))?;
    tx.rollback().await.ok();

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let decoded = row_to_json(row, entity).map_err(|err| ApiError::new(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR", err.to_string()))?;

        if let Some(filter_expr) = &view.filter_expr {
            let mut env = row_env(&artifact, &view.source_entity, &decoded, subject_id);
            for param in &view.parameters {
                if let Some(value) = params.get(param) {
                    env.insert(param.clone(), RuleValue::String(value.clone()));
                }
            }
            let keep = state.rules.eval_bool(&view.source_entity, filter_expr, &env).unwrap_or(false);
            if !keep {
                continue;
            }
        }

        out.push(project(&decoded, &view.fields));
    }

    Ok(out)
}

pub async fn list_view(
    State(state): State<AppState>,
    Path(name): Path<String>,
    subject: Option<Extension<Subject>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let subject_id = subject.map(|Extension(Subject(id))| id);
    let data = query_view_rows(&state, &name, subject_id, &params).await?;
    Ok(Json(serde_json::json!({ "status": "ok", "data": data, "messages": [] })))
}
