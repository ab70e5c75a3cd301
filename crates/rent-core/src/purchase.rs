//! # Subscription Purchase Types
//!
//! Purchase records and the payment state machine:
//!
//! ```text
//!  Initiated ──intent created──▶ Authorized ──capture confirmed──▶ Captured
//!      │                              │
//!      └──────rejected/abandoned──────┴──────────▶ Failed
//! ```
//!
//! `Captured` and `Failed` are terminal. Only `Authorized → Captured`
//! credits a balance.

use crate::error::{RentalError, RentalResult};
use crate::plan::Plan;
use crate::user::SubjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    KZT,
}

impl Currency {
    /// Returns the lowercase ISO 4217 code used by payment gateways
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "usd",
            Currency::EUR => "eur",
            Currency::GBP => "gbp",
            Currency::KZT => "kzt",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::USD
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for Currency {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "usd" => Ok(Currency::USD),
            "eur" => Ok(Currency::EUR),
            "gbp" => Ok(Currency::GBP),
            "kzt" => Ok(Currency::KZT),
            other => Err(RentalError::Validation(format!(
                "unsupported currency: {}",
                other
            ))),
        }
    }
}

/// Lifecycle of a purchase's payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Recorded, no funds action taken yet
    Initiated,
    /// Gateway created a payment intent; funds not guaranteed
    Authorized,
    /// Gateway confirmed settlement; balance credited
    Captured,
    /// Rejected or abandoned; no balance effect
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Initiated => "initiated",
            PaymentState::Authorized => "authorized",
            PaymentState::Captured => "captured",
            PaymentState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Captured | PaymentState::Failed)
    }

    /// Whether the state machine permits `self → next`
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        matches!(
            (self, next),
            (PaymentState::Initiated, PaymentState::Authorized)
                | (PaymentState::Initiated, PaymentState::Failed)
                | (PaymentState::Authorized, PaymentState::Captured)
                | (PaymentState::Authorized, PaymentState::Failed)
        )
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentState::Initiated),
            "authorized" => Ok(PaymentState::Authorized),
            "captured" => Ok(PaymentState::Captured),
            "failed" => Ok(PaymentState::Failed),
            other => Err(RentalError::Storage(format!(
                "unknown payment state: {}",
                other
            ))),
        }
    }
}

/// Input for recording a new purchase
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub plan_id: String,
    pub plan_tokens: i64,
    pub price: i64,
    pub currency: Currency,
}

impl NewPurchase {
    pub fn for_plan(subject_id: SubjectId, plan: &Plan) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            plan_id: plan.id.clone(),
            plan_tokens: plan.tokens,
            price: plan.price,
            currency: plan.currency,
        }
    }
}

/// A subscription purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub plan_id: String,

    /// Tokens credited on capture
    pub plan_tokens: i64,

    /// Amount in minor currency units
    pub price: i64,

    pub currency: Currency,

    pub payment_state: PaymentState,

    /// Gateway reference (payment intent id), set when authorized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// A fresh `Initiated` record
    pub fn initiated(new: NewPurchase) -> Self {
        let now = Utc::now();
        Self {
            id: new.id,
            subject_id: new.subject_id,
            plan_id: new.plan_id,
            plan_tokens: new.plan_tokens,
            price: new.price,
            currency: new.currency,
            payment_state: PaymentState::Initiated,
            gateway_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Error for an attempted transition out of the current state
    pub fn invalid_state(&self, expected: &'static str) -> RentalError {
        RentalError::InvalidState {
            purchase_id: self.id,
            current: self.payment_state,
            expected,
        }
    }

    /// Check that a gateway confirmation refers to this purchase's payment
    pub fn check_confirmation(&self, confirmation: &CaptureConfirmation) -> RentalResult<()> {
        if self.gateway_ref.as_deref() != Some(confirmation.gateway_ref.as_str()) {
            return Err(RentalError::payment(
                &confirmation.provider,
                format!(
                    "confirmation reference {} does not match purchase {}",
                    confirmation.gateway_ref, self.id
                ),
            ));
        }
        if confirmation.amount != self.price || confirmation.currency != self.currency {
            return Err(RentalError::payment(
                &confirmation.provider,
                format!(
                    "confirmed {} {} but purchase {} expects {} {}",
                    confirmation.amount,
                    confirmation.currency,
                    self.id,
                    self.price,
                    self.currency
                ),
            ));
        }
        Ok(())
    }
}

/// Gateway's statement that a payment settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfirmation {
    pub provider: String,
    pub gateway_ref: String,
    pub amount: i64,
    pub currency: Currency,
}
