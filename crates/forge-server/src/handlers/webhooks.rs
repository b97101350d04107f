//! `POST /webhooks/{provider}` (`spec.md` §6, §4.11 step 1 "webhooks
//! authenticate via signature, not subject"). Concrete signature schemes
//! per provider (HMAC flavors, timestamp tolerances) are a plugin-interface
//! concern (`spec.md` §1 Non-goals "webhook signature schemes beyond their
//! plugin interface") — this only enforces that *some* signature was
//! presented before dispatching the declared trigger actions.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use forge_exec::ActionInput;
use serde_json::Value as Json_;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Map<String, Json_>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let artifact = state.artifact_store.artifact().await;
    let webhook = artifact.webhooks.get(&provider).ok_or_else(ApiError::not_found)?;

    if !headers.contains_key(SIGNATURE_HEADER) {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "SIGNATURE_REQUIRED", "webhook request carried no signature header"));
    }

    let mut outcomes = Vec::with_capacity(webhook.triggers.len());
    for action_name in &webhook.triggers {
        let input = ActionInput { subject: None, row_id: None, fields: body.clone() };
        let outcome = state.executor.execute_from_webhook(action_name, input).await?;
        outcomes.push(outcome.row);
    }

    Ok(Json(serde_json::json!({ "status": "ok", "data": outcomes, "messages": [] })))
}
