//! HTTP boundary errors.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::agent::{AgentError, SessionIds, APOLOGY_MESSAGE};

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("invalid request body: {0}")]
    BadRequest(String),

    /// The model collaborator failed; the caller gets the apology.
    #[error("invocation failed: {cause}")]
    Degraded { session: SessionIds, cause: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Agent(AgentError::AgentNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Agent(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Agent(AgentError::StartupConfigurationMissing(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Agent(_) => StatusCode::BAD_GATEWAY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Degraded { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = match &self {
            ApiError::Degraded { session, .. } => json!({
                "status": "error",
                "response": APOLOGY_MESSAGE,
                "threadId": session.thread_id,
                "resourceId": session.resource_id,
            }),
            other => json!({ "status": "error", "error": other.to_string() }),
        };
        (code, Json(body)).into_response()
    }
}
