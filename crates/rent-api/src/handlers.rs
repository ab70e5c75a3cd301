//! # Request Handlers
//!
//! Axum request handlers for accounts, credentials, plans and subscriptions.
//! Protected handlers receive the [`Principal`] placed by the auth guard.

use crate::auth::Principal;
use crate::error::{rental_error_to_response, unauthorized, ApiError, ErrorResponse};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use rent_core::error::store_deadline;
use rent_core::{
    Credential, EventOutcome, NewUser, Plan, PurchaseRecord, RentalError, RentalResult, Scope,
    User,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    /// Presented once to `PUT /api/v1/users/activate`
    pub activation_token: Credential,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub authentication_token: Credential,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Catalog plan id; price and tokens always come from the catalog
    pub plan_id: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: PurchaseRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<PurchaseRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PlansResponse<'a> {
    pub plans: Vec<&'a Plan>,
    pub count: usize,
}

/// Acknowledgement sent back to the gateway
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

impl SubscriptionResponse {
    fn of(subscription: PurchaseRecord) -> Self {
        Self {
            subscription,
            client_secret: None,
            provider: None,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "toy-rental",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Register a user and hand back a one-time activation token
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let RegisterRequest {
        username,
        email,
        password,
    } = request;

    // Argon2 runs on the blocking pool.
    let new_user = blocking(move || NewUser::register(&username, &email, &password)).await?;

    let user = store_deadline(
        state.config.store_timeout,
        "create user",
        state.users.create_user(new_user),
    )
    .await
    .map_err(rental_error_to_response)?;

    let activation_token = state
        .engine
        .issue(user.id, state.config.activation_token_ttl, Scope::Activation)
        .await
        .map_err(rental_error_to_response)?;

    info!(user_id = user.id, "registered user");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user,
            activation_token,
        }),
    ))
}

/// Activate the account the activation token belongs to
#[instrument(skip(state))]
pub async fn activate_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = store_deadline(
        state.config.store_timeout,
        "activate user",
        state.users.activate(principal.subject_id),
    )
    .await
    .map_err(rental_error_to_response)?;

    state
        .engine
        .revoke(user.id, Scope::Activation)
        .await
        .map_err(rental_error_to_response)?;

    info!(user_id = user.id, "activated user");
    Ok(Json(UserResponse { user }))
}

/// Exchange username and password for an authentication token
#[instrument(skip(state, request), fields(username = %request.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    let user = store_deadline(
        state.config.store_timeout,
        "find user",
        state.users.find_by_username(request.username.trim()),
    )
    .await
    .map_err(rental_error_to_response)?;

    let Some(user) = user else {
        warn!("login for unknown user");
        return Err(unauthorized());
    };

    let password = request.password;
    let candidate = user.clone();
    let valid = blocking(move || Ok(candidate.verify_password(&password))).await?;
    if !valid {
        warn!(user_id = user.id, "login with wrong password");
        return Err(unauthorized());
    }

    let authentication_token = state
        .engine
        .issue(user.id, state.config.auth_token_ttl, Scope::Authentication)
        .await
        .map_err(rental_error_to_response)?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            authentication_token,
        }),
    ))
}

/// Revoke every authentication token of the caller
#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .revoke(principal.subject_id, Scope::Authentication)
        .await
        .map_err(rental_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current user, including the token balance
pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = current_user(&state, &principal).await?;
    Ok(Json(UserResponse { user }))
}

/// List purchasable plans
pub async fn list_plans(State(state): State<AppState>) -> impl IntoResponse {
    let plans: Vec<&Plan> = state.catalog.active_plans().collect();
    let count = plans.len();
    Json(PlansResponse { plans, count }).into_response()
}

/// Start a purchase of a catalog plan
#[instrument(skip(state, request), fields(plan_id = %request.plan_id))]
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), ApiError> {
    let user = current_user(&state, &principal).await?;
    if !user.activated {
        return Err(rental_error_to_response(RentalError::Forbidden(
            "account must be activated before purchasing".to_string(),
        )));
    }

    let plan = state
        .catalog
        .purchasable(&request.plan_id)
        .map_err(rental_error_to_response)?;

    let pending = state
        .ledger
        .begin_purchase(user.id, plan)
        .await
        .map_err(|e| {
            error!("Failed to start purchase: {}", e);
            rental_error_to_response(e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse {
            subscription: pending.purchase,
            client_secret: pending.client_secret,
            provider: Some(state.ledger.provider_name()),
        }),
    ))
}

/// The caller's purchases, newest first
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let subscriptions = state
        .ledger
        .purchases_for(principal.subject_id)
        .await
        .map_err(rental_error_to_response)?;

    let count = subscriptions.len();
    Ok(Json(SubscriptionsResponse {
        subscriptions,
        count,
    }))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let purchase = owned_purchase(&state, &principal, id).await?;
    Ok(Json(SubscriptionResponse::of(purchase)))
}

/// Ask the gateway for the payment status and apply it
#[instrument(skip(state))]
pub async fn confirm_subscription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    owned_purchase(&state, &principal, id).await?;

    let purchase = state
        .ledger
        .sync_with_gateway(id)
        .await
        .map_err(rental_error_to_response)?;

    Ok(Json(SubscriptionResponse::of(purchase)))
}

/// Abandon a purchase that has not been captured
#[instrument(skip(state))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    owned_purchase(&state, &principal, id).await?;

    let purchase = state
        .ledger
        .mark_failed(id, "canceled by subscriber")
        .await
        .map_err(rental_error_to_response)?;

    Ok(Json(SubscriptionResponse::of(purchase)))
}

/// Handle Stripe webhook
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("Missing Stripe-Signature header", 400)),
            )
        })?;

    let event = state
        .gateway
        .verify_webhook(&body, signature)
        .await
        .map_err(|e| {
            error!("Webhook verification failed: {}", e);
            rental_error_to_response(e)
        })?;

    info!("Received webhook: kind={:?}, id={}", event.kind, event.event_id);

    let outcome = match state.ledger.apply_event(&event).await {
        Ok(outcome) => outcome_name(&outcome),
        // Let the gateway redeliver when our store is unavailable.
        Err(e @ RentalError::Storage(_)) => return Err(rental_error_to_response(e)),
        Err(e) => {
            warn!(event_id = %event.event_id, "webhook event rejected: {}", e);
            "rejected"
        }
    };

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

// =============================================================================
// Helpers
// =============================================================================

async fn current_user(state: &AppState, principal: &Principal) -> Result<User, ApiError> {
    store_deadline(
        state.config.store_timeout,
        "find user",
        state.users.find_by_id(principal.subject_id),
    )
    .await
    .map_err(rental_error_to_response)?
    .ok_or_else(unauthorized)
}

/// Load a purchase owned by the caller. Other callers' purchases are reported
/// as missing.
async fn owned_purchase(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
) -> Result<PurchaseRecord, ApiError> {
    match state.ledger.purchase(id).await {
        Ok(purchase) if purchase.subject_id == principal.subject_id => Ok(purchase),
        Ok(_) => Err(rental_error_to_response(RentalError::not_found("purchase", id))),
        Err(e) => Err(rental_error_to_response(e)),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> RentalResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| rental_error_to_response(RentalError::Internal(e.to_string())))?
        .map_err(rental_error_to_response)
}

fn outcome_name(outcome: &EventOutcome) -> &'static str {
    match outcome {
        EventOutcome::Captured(_) => "captured",
        EventOutcome::Failed(_) => "failed",
        EventOutcome::AlreadyApplied(_) => "already_applied",
        EventOutcome::Ignored => "ignored",
    }
}
