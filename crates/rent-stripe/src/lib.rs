//! # rent-stripe
//!
//! Stripe payment gateway for toy-rental-rs.
//!
//! [`StripeIntentGateway`] implements `rent_core::PaymentGateway` on top of the
//! PaymentIntents API:
//!
//! - creates intents for a purchase (form-encoded, idempotent per purchase)
//! - polls intent status for reconciliation
//! - verifies `Stripe-Signature` webhooks and parses PaymentIntent events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rent_core::EntitlementLedger;
//! use rent_stripe::StripeIntentGateway;
//!
//! let gateway = Arc::new(StripeIntentGateway::from_env()?);
//! let ledger = EntitlementLedger::new(store, gateway);
//! ```

pub mod config;
pub mod intent;
pub mod webhook;

// Re-exports
pub use config::StripeConfig;
pub use intent::StripeIntentGateway;
pub use webhook::REQUIRED_WEBHOOK_EVENTS;
