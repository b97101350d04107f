//! `GET /health`: liveness plus a real round-trip to the database, the same
//! check `sem_os_server::main`'s pool setup implicitly performs on startup.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok", "database": "reachable" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "error", "database": "unreachable", "detail": err.to_string() })),
        ),
    }
}
