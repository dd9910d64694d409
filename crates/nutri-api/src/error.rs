use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error taxonomy. Every variant maps to one status code and a stable
/// machine-readable `code` in the response body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("access denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    SubscriptionRequired { message: String },
    #[error("{message}")]
    DailyLimitReached {
        message: String,
        reset_at: NaiveDateTime,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Maps a store failure on a version write: a uniqueness violation on
    /// the active-per-platform index is the loser of an activation race and
    /// must surface as a conflict, everything else is internal.
    pub fn from_version_write(err: anyhow::Error) -> Self {
        if nutri_db::is_unique_violation(&err) {
            ApiError::Conflict(
                "an active version configuration already exists for this platform".to_string(),
            )
        } else {
            ApiError::Internal(err)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::SubscriptionRequired { .. } | ApiError::DailyLimitReached { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "access_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::SubscriptionRequired { .. } => "subscription_required",
            ApiError::DailyLimitReached { .. } => "daily_limit_reached",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_reset_time: Option<NaiveDateTime>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Internals are logged, never echoed to the caller.
            ApiError::Internal(e) => {
                error!("internal error: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let next_reset_time = match &self {
            ApiError::DailyLimitReached { reset_at, .. } => Some(*reset_at),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code(),
            message,
            next_reset_time,
        };
        (self.status(), Json(body)).into_response()
    }
}
