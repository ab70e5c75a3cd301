//! # Rental Error Types
//!
//! Typed error handling for the credential engine and entitlement ledger.
//! All core operations return `Result<T, RentalError>`.

use crate::purchase::PaymentState;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Core error type for credential and entitlement operations
#[derive(Debug, Error)]
pub enum RentalError {
    /// Malformed input (caller's fault)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Credential missing, invalid, expired or issued for another scope.
    /// Deliberately carries no detail about which check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique constraint or duplicate resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Illegal payment state transition (e.g. double capture)
    #[error("Purchase {purchase_id} is {current}, expected {expected}")]
    InvalidState {
        purchase_id: Uuid,
        current: PaymentState,
        expected: &'static str,
    },

    /// Gateway rejected the request, timed out, or sent a mismatching confirmation.
    /// `timed_out` means the gateway may still have acted on the request.
    #[error("Payment error [{provider}]: {message}")]
    Payment {
        provider: String,
        message: String,
        timed_out: bool,
    },

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Persistence failure or store timeout
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RentalError {
    pub fn payment(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RentalError::Payment {
            provider: provider.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    /// A gateway call with no answer before its deadline
    pub fn payment_timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RentalError::Payment {
            provider: provider.into(),
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RentalError::Payment { timed_out: true, .. })
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RentalError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RentalError::Storage(_) | RentalError::Payment { .. })
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RentalError::Validation(_) => 400,
            RentalError::Unauthorized => 401,
            RentalError::Forbidden(_) => 403,
            RentalError::NotFound { .. } => 404,
            RentalError::Conflict(_) => 409,
            RentalError::InvalidState { .. } => 409,
            RentalError::Payment { .. } => 502,
            RentalError::WebhookVerificationFailed(_) => 400,
            RentalError::WebhookParse(_) => 400,
            RentalError::Storage(_) => 503,
            RentalError::Configuration(_) => 500,
            RentalError::Internal(_) => 500,
        }
    }
}

/// Result type alias for rental operations
pub type RentalResult<T> = Result<T, RentalError>;

/// Run a store call under a deadline. Expiry becomes `RentalError::Storage`.
pub async fn store_deadline<T, F>(deadline: Duration, op: &str, fut: F) -> RentalResult<T>
where
    F: Future<Output = RentalResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RentalError::Storage(format!(
            "{} timed out after {}ms",
            op,
            deadline.as_millis()
        ))),
    }
}

/// Run a gateway call under a deadline. Expiry becomes `RentalError::Payment`.
pub async fn gateway_deadline<T, F>(
    deadline: Duration,
    provider: &str,
    fut: F,
) -> RentalResult<T>
where
    F: Future<Output = RentalResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RentalError::payment_timeout(
            provider,
            format!("no response after {}ms", deadline.as_millis()),
        )),
    }
}
