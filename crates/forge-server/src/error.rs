//! Maps domain errors to the canonical HTTP envelope (`spec.md` §6, §7),
//! the same shape as `sem_os_server::error::AppError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forge_exec::{ExecError, MessageOut};
use serde_json::json;

pub struct ApiError {
    status: StatusCode,
    messages: Vec<MessageOut>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self { status, messages: vec![MessageOut { code: code.to_string(), level: "error".to_string(), message: message.into() }] }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "The requested resource was not found.")
    }

    pub fn auth_required() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", "Authentication is required for this action.")
    }

    pub fn dev_only() -> Self {
        Self::not_found()
    }
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::AuthRequired => ApiError::auth_required(),
            ExecError::ActionNotFound(_) => ApiError::not_found(),
            ExecError::NotFound => ApiError::not_found(),
            // Unlike the direct-read paths (which filter existence out of the
            // result set entirely via `read_sql`), an action's access denial
            // fires after the row was already located by the id the caller
            // supplied — existence isn't in question, so the literal
            // `spec.md` §7 taxonomy (403, `ACCESS_DENIED`) applies rather than
            // the read-side "prefer 404" guidance.
            ExecError::AccessDenied => ApiError::new(StatusCode::FORBIDDEN, "ACCESS_DENIED", "You do not have access to perform this action."),
            ExecError::RuleRejected(message) => ApiError { status: StatusCode::UNPROCESSABLE_ENTITY, messages: vec![message] },
            ExecError::Validation(detail) => ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", detail),
            ExecError::Conflict(detail) => ApiError::new(StatusCode::CONFLICT, "CONFLICT", detail),
            ExecError::Db(_) | ExecError::Sqlx(_) => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", "The database is temporarily unavailable."),
            ExecError::Rule(err) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "RULE_EVAL_ERROR", err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "data": null, "messages": self.messages });
        (self.status, Json(body)).into_response()
    }
}
