//! # rent-core
//!
//! Credential engine and entitlement ledger for the toy-rental backend.
//!
//! This crate provides:
//! - `TokenEngine` for issuing and validating scoped bearer credentials
//! - `reclaim::spawn` for the cancelable expired-token sweep
//! - `EntitlementLedger` for the purchase state machine and balance credits
//! - `PaymentGateway` trait for payment providers
//! - Storage traits plus an in-memory implementation
//! - `RentalError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use rent_core::{EntitlementLedger, MemoryStore, Scope, TokenEngine};
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = TokenEngine::new(store.clone());
//!
//! // Log a user in
//! let credential = engine.issue(user.id, Duration::hours(24), Scope::Authentication).await?;
//!
//! // Later, at the request boundary
//! let subject_id = engine.validate(&presented, Scope::Authentication).await?;
//!
//! // Buy a plan; tokens are credited only after the gateway confirms capture
//! let ledger = EntitlementLedger::new(store, gateway);
//! let purchase = ledger.request_purchase(subject_id, &plan).await?;
//! ```

pub mod engine;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod plan;
pub mod purchase;
pub mod reclaim;
pub mod store;
pub mod token;
pub mod user;

// Re-exports for convenience
pub use engine::TokenEngine;
pub use error::{RentalError, RentalResult};
pub use gateway::{
    BoxedPaymentGateway, IntentRequest, IntentStatus, PaymentEvent, PaymentEventKind,
    PaymentGateway, PaymentIntent,
};
pub use ledger::{EntitlementLedger, EventOutcome, PendingPayment};
pub use memory::MemoryStore;
pub use plan::{Plan, PlanCatalog};
pub use purchase::{CaptureConfirmation, Currency, NewPurchase, PaymentState, PurchaseRecord};
pub use reclaim::ReclaimerHandle;
pub use store::{
    CredentialStore, EntitlementStore, SharedCredentialStore, SharedEntitlementStore,
    SharedUserStore, UserStore,
};
pub use token::{Credential, Scope, TokenHash, TokenRecord};
pub use user::{NewUser, SubjectId, User};
