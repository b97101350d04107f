//! `POST /api/actions/{name}` (`spec.md` §6): the one write path every
//! client binding method resolves to, per `ArtifactAction`.

use crate::auth::Subject;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::Json;
use forge_exec::ActionInput;
use serde_json::Value as Json_;
use uuid::Uuid;

#[derive(serde::Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(flatten)]
    fields: serde_json::Map<String, Json_>,
}

pub async fn run_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    subject: Option<Extension<Subject>>,
    Json(body): Json<ActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let input = ActionInput { subject: subject.map(|Extension(Subject(id))| id), row_id: body.id, fields: body.fields };
    let outcome = state.executor.execute(&name, input).await?;
    Ok(Json(serde_json::json!({ "status": "ok", "data": outcome.row, "messages": outcome.messages })))
}
