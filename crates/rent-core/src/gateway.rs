//! # Payment Gateway Trait
//!
//! The only contract the entitlement ledger needs from a payment provider.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   PaymentGateway (trait)                    │
//! │  ├── create_intent()                                        │
//! │  ├── intent_status()        (polling transport)             │
//! │  ├── verify_webhook()       (push transport)                │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │StripeIntent   │
//!                    │   Gateway     │
//!                    └───────────────┘
//! ```
//!
//! Creating an intent is never proof of payment. Only a `Succeeded` status or
//! event leads the ledger to credit tokens.

use crate::error::RentalResult;
use crate::purchase::{CaptureConfirmation, Currency};
use crate::user::SubjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Request to create a payment intent
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub purchase_id: Uuid,
    pub subject_id: SubjectId,
    pub amount: i64,
    pub currency: Currency,
}

/// A payment intent created by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway's reference (e.g. `pi_...`)
    pub gateway_ref: String,

    /// Secret the client uses to complete payment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    pub status: IntentStatus,
}

/// Gateway-side lifecycle of an intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Awaiting payment method, confirmation, or processing
    Pending,
    /// Funds settled
    Succeeded { amount: i64, currency: Currency },
    /// Payment attempt failed
    Failed { reason: String },
    /// Intent cancelled
    Canceled,
}

/// What a verified gateway event asks the ledger to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Canceled,
    Unknown(String),
}

/// A verified, parsed webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub kind: PaymentEventKind,
    pub provider: String,

    /// Payment intent the event refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,

    /// Our purchase id, from intent metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    /// The capture confirmation carried by a `Succeeded` event, if complete
    pub fn confirmation(&self) -> Option<CaptureConfirmation> {
        match (&self.kind, &self.gateway_ref, self.amount, self.currency) {
            (PaymentEventKind::Succeeded, Some(gateway_ref), Some(amount), Some(currency)) => {
                Some(CaptureConfirmation {
                    provider: self.provider.clone(),
                    gateway_ref: gateway_ref.clone(),
                    amount,
                    currency,
                })
            }
            _ => None,
        }
    }
}

/// Core trait for payment provider implementations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for the given amount.
    async fn create_intent(&self, request: &IntentRequest) -> RentalResult<PaymentIntent>;

    /// Ask the gateway for an intent's current status.
    async fn intent_status(&self, gateway_ref: &str) -> RentalResult<IntentStatus>;

    /// Verify a webhook signature and parse the event.
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> RentalResult<PaymentEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared payment gateway (dynamic dispatch)
pub type BoxedPaymentGateway = Arc<dyn PaymentGateway>;
