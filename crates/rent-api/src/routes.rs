//! # Routes
//!
//! Axum router configuration for the toy-rental API.

use crate::auth::{require_activation, require_authentication};
use crate::handlers;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - Public:
///   - POST /api/v1/users - Register (returns an activation token)
///   - POST /api/v1/tokens/authentication - Log in
///   - GET  /api/v1/plans - List plans
///
/// - Activation token:
///   - PUT /api/v1/users/activate - Activate account
///
/// - Authentication token:
///   - DELETE /api/v1/tokens/authentication - Log out
///   - GET    /api/v1/users/me - Profile and token balance
///   - POST   /api/v1/subscriptions - Buy a plan
///   - GET    /api/v1/subscriptions - List own purchases
///   - GET    /api/v1/subscriptions/{id} - Get own purchase
///   - POST   /api/v1/subscriptions/{id}/confirm - Poll the gateway
///   - POST   /api/v1/subscriptions/{id}/cancel - Abandon a purchase
///
/// - Webhooks:
///   - POST /webhook/stripe - Stripe webhook handler
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let authenticated = middleware::from_fn_with_state(state.clone(), require_authentication);

    // Login is public, logout needs the token being revoked.
    let token_routes = Router::new().route(
        "/tokens/authentication",
        post(handlers::login).merge(delete(handlers::logout).route_layer(authenticated.clone())),
    );

    let public_routes = Router::new()
        .route("/users", post(handlers::register_user))
        .route("/plans", get(handlers::list_plans));

    let activation_routes = Router::new()
        .route("/users/activate", put(handlers::activate_user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_activation,
        ));

    let authenticated_routes = Router::new()
        .route("/users/me", get(handlers::me))
        .route(
            "/subscriptions",
            post(handlers::create_subscription).get(handlers::list_subscriptions),
        )
        .route("/subscriptions/{id}", get(handlers::get_subscription))
        .route(
            "/subscriptions/{id}/confirm",
            post(handlers::confirm_subscription),
        )
        .route(
            "/subscriptions/{id}/cancel",
            post(handlers::cancel_subscription),
        )
        .route_layer(authenticated);

    let api_routes = Router::new()
        .merge(public_routes)
        .merge(token_routes)
        .merge(activation_routes)
        .merge(authenticated_routes);

    // Webhook routes (no CORS, must accept raw body)
    let webhook_routes = Router::new().route("/stripe", post(handlers::stripe_webhook));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .nest("/api/v1", api_routes.layer(cors))
        .nest("/webhook", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
