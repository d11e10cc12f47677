//! # HTTP error mapping
//!
//! `ApiError` wraps the core `AppError` so every failure leaves the server as
//! a distinct status with a machine-readable body:
//! `{"error": "<kind>", "message": "<text>"}`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use rl_core::error::AppError;
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub struct ApiError(pub AppError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    /// Stable, machine-readable kind for the response body.
    pub fn kind(&self) -> &'static str {
        match self.0 {
            AppError::NotFound(..) => "not_found",
            AppError::ValidationError(_) => "bad_input",
            AppError::Conflict(_) => "conflict",
            AppError::Storage(_) => "storage_failure",
            AppError::UploadFailed(_) => "upload_failed",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UploadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{status}: {}", self.0);
        } else {
            log::debug!("{status}: {}", self.0);
        }
        HttpResponse::build(status).json(ErrorBody {
            error: self.kind(),
            message: self.0.to_string(),
        })
    }
}

/// Shorthand used by the handlers.
pub fn bad_input(message: impl fmt::Display) -> ApiError {
    ApiError(AppError::ValidationError(message.to_string()))
}
