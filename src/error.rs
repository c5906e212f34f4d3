use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::user::UserError;

pub const CODE_TOO_MANY_REQUESTS: &str = "TOO_MANY_REQUESTS";
pub const CODE_INVALID_JSON: &str = "INVALID_JSON";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const CODE_USER_NOT_FOUND: &str = "USER_NOT_FOUND";
pub const CODE_DUPLICATE_EMAIL: &str = "DUPLICATE_EMAIL";
pub const CODE_INVALID_NAME: &str = "INVALID_NAME";
pub const CODE_INVALID_EMAIL: &str = "INVALID_EMAIL";

/// JSON error envelope returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("invalid json")]
    InvalidJson,
    #[error(transparent)]
    User(#[from] UserError),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidJson => StatusCode::BAD_REQUEST,
            Self::User(UserError::NotFound) => StatusCode::NOT_FOUND,
            Self::User(UserError::DuplicateEmail) => StatusCode::CONFLICT,
            Self::User(UserError::InvalidName | UserError::InvalidEmail) => StatusCode::BAD_REQUEST,
            Self::User(UserError::Storage(_)) | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => CODE_TOO_MANY_REQUESTS,
            Self::InvalidJson => CODE_INVALID_JSON,
            Self::User(UserError::NotFound) => CODE_USER_NOT_FOUND,
            Self::User(UserError::DuplicateEmail) => CODE_DUPLICATE_EMAIL,
            Self::User(UserError::InvalidName) => CODE_INVALID_NAME,
            Self::User(UserError::InvalidEmail) => CODE_INVALID_EMAIL,
            Self::User(UserError::Storage(_)) | Self::Internal => CODE_INTERNAL_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Storage details stay in the logs.
            error!("Request failed: {}", self);
            ApiError::Internal.to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
