use crate::binding::BindingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gpushare_core::GpushareError;
use gpushare_scheduler::SchedulerError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Node or device unknown to the inventory (404)
    #[error("{0}")]
    NotFound(String),

    /// Lost a race or pod already bound (409)
    #[error("{0}")]
    Conflict(String),

    /// No node can host the pod (422)
    #[error("{0}")]
    Unprocessable(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::ValidationError(_) => ApiError::BadRequest(err.to_string()),
            SchedulerError::Infeasible { .. } => ApiError::Unprocessable(err.to_string()),
            SchedulerError::CapacityRace { .. } | SchedulerError::AlreadyBound { .. } => {
                ApiError::Conflict(err.to_string())
            }
            SchedulerError::InventoryInconsistency { .. } => ApiError::NotFound(err.to_string()),
        }
    }
}

impl From<GpushareError> for ApiError {
    fn from(err: GpushareError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<BindingError> for ApiError {
    fn from(err: BindingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}
