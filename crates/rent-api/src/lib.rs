//! # rent-api
//!
//! HTTP API layer for toy-rental-rs.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Bearer-token auth guard backed by the token engine
//! - REST endpoints for accounts, plans and subscriptions
//! - Webhook handler for payment events
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/users` | Register |
//! | PUT | `/api/v1/users/activate` | Activate account |
//! | POST | `/api/v1/tokens/authentication` | Log in |
//! | DELETE | `/api/v1/tokens/authentication` | Log out |
//! | GET | `/api/v1/users/me` | Profile and balance |
//! | GET | `/api/v1/plans` | List plans |
//! | POST | `/api/v1/subscriptions` | Buy a plan |
//! | GET | `/api/v1/subscriptions` | List purchases |
//! | GET | `/api/v1/subscriptions/{id}` | Get purchase |
//! | POST | `/api/v1/subscriptions/{id}/confirm` | Poll the gateway |
//! | POST | `/api/v1/subscriptions/{id}/cancel` | Abandon a purchase |
//! | POST | `/webhook/stripe` | Stripe webhook |

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::AppConfig;
pub use routes::create_router;
pub use state::{AppState, Stores};
