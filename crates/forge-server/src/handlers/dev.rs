//! `GET /_dev/{section}` (`spec.md` §6): development-only introspection
//! over the live artifact and runtime state. 404s in production rather than
//! the route simply not existing, so no response-time/behavior difference
//! leaks which mode the deployment runs in.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;

pub async fn inspect(State(state): State<AppState>, Path(section): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.is_dev() {
        return Err(ApiError::dev_only());
    }
    let artifact = state.artifact_store.artifact().await;

    let body = match section.as_str() {
        "info" => serde_json::json!({
            "app": artifact.app,
            "version": artifact.migration.version,
            "reload_history": state.artifact_store.reload_history().await,
        }),
        "routes" => serde_json::json!({
            "actions": artifact.actions.keys().map(|n| format!("POST /api/actions/{n}")).collect::<Vec<_>>(),
            "views": artifact.views.keys().map(|n| format!("GET /api/views/{n}")).collect::<Vec<_>>(),
            "entities": artifact.entities.keys().map(|n| format!("GET /api/entities/{n}")).collect::<Vec<_>>(),
            "webhooks": artifact.webhooks.keys().map(|n| format!("POST /webhooks/{n}")).collect::<Vec<_>>(),
        }),
        "schema" => serde_json::json!({ "entities": artifact.entities, "relations": artifact.relations }),
        "actions" => serde_json::json!(artifact.actions),
        "rules" => serde_json::json!(artifact.rules),
        "access" => serde_json::json!(artifact.access),
        "views" => serde_json::json!(artifact.views),
        "jobs" => serde_json::json!({
            "declared": artifact.jobs,
            "pending": state.job_queue.pending_len(),
            "dead_letters": state.job_queue.dead_letters(),
        }),
        "messages" => serde_json::json!(artifact.messages),
        "database" => serde_json::json!({ "size": state.db.stats().size, "idle": state.db.stats().idle }),
        "websocket" => serde_json::json!({ "note": "per-view subscriber counts are available via GET /_dev/websocket/{view}" }),
        "config" => serde_json::json!({ "environment": if state.is_dev() { "development" } else { "production" } }),
        "imperatives" => serde_json::json!({
            "note": "imperative declarations are build-time only and are not carried into the runtime artifact; they are dispatched by an external function registry.",
        }),
        _ => return Err(ApiError::not_found()),
    };

    Ok(Json(body))
}

pub async fn websocket_subscribers(State(state): State<AppState>, Path(view): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.is_dev() {
        return Err(ApiError::dev_only());
    }
    let count = state.hub.subscriber_count(&view).await;
    Ok(Json(serde_json::json!({ "view": view, "subscribers": count })))
}
