//! # Auth Guard
//!
//! Middleware that resolves `Authorization: Bearer <token>` to a principal
//! before the handler runs. Every failure is the same opaque 401.

use crate::error::{rental_error_to_response, unauthorized, ApiError};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use rent_core::{RentalError, Scope, SubjectId};
use tracing::debug;

/// The authenticated subject, placed in request extensions by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: SubjectId,
    pub scope: Scope,
}

/// Extract the plaintext from exactly one `Authorization: Bearer <token>` header
pub fn parse_bearer(headers: &HeaderMap) -> Option<&str> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }

    let token = value.to_str().ok()?.strip_prefix("Bearer ")?;
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Guard for routes that need a logged-in user
pub async fn require_authentication(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard(&state, Scope::Authentication, req, next).await
}

/// Guard for the account activation route
pub async fn require_activation(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    guard(&state, Scope::Activation, req, next).await
}

async fn guard(
    state: &AppState,
    scope: Scope,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = parse_bearer(req.headers()) else {
        debug!("missing or malformed credential");
        return Err(unauthorized());
    };

    let subject_id = match state.engine.validate(token, scope).await {
        Ok(subject_id) => subject_id,
        Err(RentalError::Validation(_)) | Err(RentalError::Unauthorized) => {
            return Err(unauthorized());
        }
        Err(e) => return Err(rental_error_to_response(e)),
    };

    req.extensions_mut().insert(Principal { subject_id, scope });
    Ok(next.run(req).await)
}
