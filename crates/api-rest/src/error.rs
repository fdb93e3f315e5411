use api_shared::ErrorRes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use hms_core::{GatewayError, HmsError};

/// Maps core errors onto HTTP responses.
///
/// Rule rejections become 4xx with the core message. Uncertain outcomes (gateway timeouts,
/// a busy database) become 503 with `retryable: true`. Anything else is logged and hidden
/// behind a generic 500.
#[derive(Debug)]
pub struct ApiError(pub HmsError);

impl From<HmsError> for ApiError {
    fn from(err: HmsError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_retryable() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        match &self.0 {
            HmsError::NotFound { .. } => StatusCode::NOT_FOUND,
            HmsError::Conflict(_)
            | HmsError::Duplicate(_)
            | HmsError::InvalidTransition { .. }
            | HmsError::InsufficientStock { .. } => StatusCode::CONFLICT,
            HmsError::Validation(_) | HmsError::InvalidQuantitySign { .. } | HmsError::Text(_) => {
                StatusCode::BAD_REQUEST
            }
            HmsError::Gateway(GatewayError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            HmsError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self.0, "request failed");
            "Internal error".to_owned()
        } else {
            self.0.to_string()
        };
        let body = ErrorRes {
            error: message,
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
