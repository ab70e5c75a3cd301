//! HTTP rendering of `RentalError`.

use axum::{http::StatusCode, Json};
use rent_core::RentalError;
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Rejection type shared by every handler
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn rental_error_to_response(err: RentalError) -> ApiError {
    let code = err.status_code();
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let response = match &err {
        RentalError::Unauthorized => ErrorResponse::new("unauthorized", code),
        RentalError::Internal(_) | RentalError::Configuration(_) => {
            error!("internal error: {}", err);
            ErrorResponse::new("internal server error", code)
        }
        RentalError::Storage(_) => {
            error!("storage error: {}", err);
            ErrorResponse::new("service temporarily unavailable", code)
        }
        _ => ErrorResponse::new(err.to_string(), code),
    };

    (status, Json(response))
}

/// The generic 401 every failed credential check produces
pub fn unauthorized() -> ApiError {
    rental_error_to_response(RentalError::Unauthorized)
}
