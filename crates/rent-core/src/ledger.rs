//! # Entitlement Ledger
//!
//! Drives the purchase state machine and is the only code that raises a
//! principal's token balance.
//!
//! A purchase is credited only through [`EntitlementLedger::confirm_capture`],
//! which hands the state guard, the balance credit and the `Captured`
//! transition to the store as one atomic unit. Either transport can drive it:
//! a verified webhook ([`EntitlementLedger::apply_event`]) or a poll of the
//! gateway ([`EntitlementLedger::sync_with_gateway`]).

use crate::error::{gateway_deadline, store_deadline, RentalError, RentalResult};
use crate::gateway::{BoxedPaymentGateway, IntentRequest, IntentStatus, PaymentEvent, PaymentEventKind};
use crate::plan::Plan;
use crate::purchase::{CaptureConfirmation, NewPurchase, PaymentState, PurchaseRecord};
use crate::store::SharedEntitlementStore;
use crate::user::SubjectId;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default deadline for entitlement store calls
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default deadline for payment gateway calls
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of applying a gateway event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Captured(PurchaseRecord),
    Failed(PurchaseRecord),
    /// Already in the state the event asks for (duplicate delivery)
    AlreadyApplied(PurchaseRecord),
    Ignored,
}

/// An authorized purchase awaiting capture
#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub purchase: PurchaseRecord,

    /// Handed to the payer to complete the intent; never persisted
    pub client_secret: Option<String>,
}

pub struct EntitlementLedger {
    store: SharedEntitlementStore,
    gateway: BoxedPaymentGateway,
    store_timeout: Duration,
    gateway_timeout: Duration,
}

impl EntitlementLedger {
    pub fn new(store: SharedEntitlementStore, gateway: BoxedPaymentGateway) -> Self {
        Self {
            store,
            gateway,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    /// Builder: set store and gateway deadlines
    pub fn with_timeouts(mut self, store_timeout: Duration, gateway_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self.gateway_timeout = gateway_timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.gateway.provider_name()
    }

    /// Record a purchase of `plan` and ask the gateway for a payment intent.
    ///
    /// Success leaves the purchase `Authorized`. Nothing is credited here:
    /// an intent is not a payment.
    pub async fn request_purchase(
        &self,
        subject_id: SubjectId,
        plan: &Plan,
    ) -> RentalResult<PurchaseRecord> {
        self.begin_purchase(subject_id, plan)
            .await
            .map(|pending| pending.purchase)
    }

    /// Same as [`Self::request_purchase`], also returning the client secret
    /// the payer needs to complete the intent.
    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn begin_purchase(
        &self,
        subject_id: SubjectId,
        plan: &Plan,
    ) -> RentalResult<PendingPayment> {
        plan.validate()?;

        let purchase = store_deadline(
            self.store_timeout,
            "create purchase",
            self.store.create_purchase(NewPurchase::for_plan(subject_id, plan)),
        )
        .await?;

        let request = IntentRequest {
            purchase_id: purchase.id,
            subject_id,
            amount: purchase.price,
            currency: purchase.currency,
        };

        let provider = self.gateway.provider_name();
        match gateway_deadline(
            self.gateway_timeout,
            provider,
            self.gateway.create_intent(&request),
        )
        .await
        {
            Ok(intent) => {
                let authorized = store_deadline(
                    self.store_timeout,
                    "authorize purchase",
                    self.store.mark_authorized(purchase.id, &intent.gateway_ref),
                )
                .await?;
                info!(
                    purchase_id = %authorized.id,
                    gateway_ref = %intent.gateway_ref,
                    "purchase authorized"
                );
                Ok(PendingPayment {
                    purchase: authorized,
                    client_secret: intent.client_secret,
                })
            }
            Err(e) if e.is_timeout() => {
                // The intent may exist on the gateway side; leave it Initiated.
                warn!(purchase_id = %purchase.id, "payment intent creation timed out: {}", e);
                Err(e)
            }
            Err(e) => {
                error!(purchase_id = %purchase.id, "payment intent creation failed: {}", e);
                if let Err(mark_err) = store_deadline(
                    self.store_timeout,
                    "fail purchase",
                    self.store.mark_failed(purchase.id),
                )
                .await
                {
                    error!(purchase_id = %purchase.id, "could not mark purchase failed: {}", mark_err);
                }
                Err(e)
            }
        }
    }

    /// Credit the purchase's tokens once the gateway confirms capture.
    ///
    /// Only an `Authorized` purchase can be captured. A second confirmation
    /// fails with `InvalidState` and credits nothing.
    #[instrument(skip(self, confirmation), fields(gateway_ref = %confirmation.gateway_ref))]
    pub async fn confirm_capture(
        &self,
        purchase_id: Uuid,
        confirmation: &CaptureConfirmation,
    ) -> RentalResult<PurchaseRecord> {
        let purchase = self.load(purchase_id).await?;
        if purchase.payment_state != PaymentState::Authorized {
            return Err(purchase.invalid_state("authorized"));
        }
        purchase.check_confirmation(confirmation)?;

        // The store re-checks the state inside the same unit of work.
        let balance = store_deadline(
            self.store_timeout,
            "capture purchase",
            self.store.credit_balance_and_mark_captured(
                purchase.subject_id,
                purchase.plan_tokens,
                purchase.id,
            ),
        )
        .await?;

        info!(
            purchase_id = %purchase.id,
            subject_id = purchase.subject_id,
            credited = purchase.plan_tokens,
            balance,
            "purchase captured"
        );

        Ok(PurchaseRecord {
            payment_state: PaymentState::Captured,
            ..purchase
        })
    }

    /// Move a purchase to `Failed`: gateway rejection or caller abandonment
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, purchase_id: Uuid, reason: &str) -> RentalResult<PurchaseRecord> {
        let failed = store_deadline(
            self.store_timeout,
            "fail purchase",
            self.store.mark_failed(purchase_id),
        )
        .await?;
        info!(purchase_id = %purchase_id, reason, "purchase failed");
        Ok(failed)
    }

    /// Poll the gateway and apply what it reports
    #[instrument(skip(self))]
    pub async fn sync_with_gateway(&self, purchase_id: Uuid) -> RentalResult<PurchaseRecord> {
        let purchase = self.load(purchase_id).await?;
        if purchase.payment_state != PaymentState::Authorized {
            return Ok(purchase);
        }

        let gateway_ref = purchase.gateway_ref.clone().ok_or_else(|| {
            RentalError::Internal(format!("authorized purchase {} has no gateway ref", purchase.id))
        })?;

        let provider = self.gateway.provider_name();
        let status = gateway_deadline(
            self.gateway_timeout,
            provider,
            self.gateway.intent_status(&gateway_ref),
        )
        .await?;

        match status {
            IntentStatus::Pending => {
                debug!(purchase_id = %purchase.id, "payment still pending");
                Ok(purchase)
            }
            IntentStatus::Succeeded { amount, currency } => {
                let confirmation = CaptureConfirmation {
                    provider: provider.to_string(),
                    gateway_ref,
                    amount,
                    currency,
                };
                self.confirm_capture(purchase.id, &confirmation).await
            }
            IntentStatus::Failed { reason } => self.mark_failed(purchase.id, &reason).await,
            IntentStatus::Canceled => self.mark_failed(purchase.id, "canceled").await,
        }
    }

    /// Apply a verified gateway event. Duplicate deliveries are reported as
    /// `AlreadyApplied` rather than failing, so the gateway stops retrying.
    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn apply_event(&self, event: &PaymentEvent) -> RentalResult<EventOutcome> {
        let purchase_id = match (&event.kind, event.purchase_id) {
            (PaymentEventKind::Unknown(kind), _) => {
                debug!(kind = %kind, "ignoring unhandled payment event");
                return Ok(EventOutcome::Ignored);
            }
            (_, Some(id)) => id,
            (_, None) => {
                warn!("payment event carries no purchase id");
                return Ok(EventOutcome::Ignored);
            }
        };

        let result = match event.kind {
            PaymentEventKind::Succeeded => {
                let confirmation = event.confirmation().ok_or_else(|| {
                    RentalError::WebhookParse("succeeded event without amount or reference".to_string())
                })?;
                self.confirm_capture(purchase_id, &confirmation)
                    .await
                    .map(EventOutcome::Captured)
            }
            PaymentEventKind::Failed | PaymentEventKind::Canceled => {
                let reason = event.failure_reason.as_deref().unwrap_or("canceled");
                self.mark_failed(purchase_id, reason)
                    .await
                    .map(EventOutcome::Failed)
            }
            PaymentEventKind::Unknown(_) => return Ok(EventOutcome::Ignored),
        };

        match result {
            Err(RentalError::InvalidState { current, .. })
                if current == target_state(&event.kind) =>
            {
                let purchase = self.load(purchase_id).await?;
                Ok(EventOutcome::AlreadyApplied(purchase))
            }
            other => other,
        }
    }

    pub async fn purchase(&self, purchase_id: Uuid) -> RentalResult<PurchaseRecord> {
        self.load(purchase_id).await
    }

    pub async fn purchases_for(&self, subject_id: SubjectId) -> RentalResult<Vec<PurchaseRecord>> {
        store_deadline(
            self.store_timeout,
            "list purchases",
            self.store.purchases_for_subject(subject_id),
        )
        .await
    }

    async fn load(&self, purchase_id: Uuid) -> RentalResult<PurchaseRecord> {
        store_deadline(
            self.store_timeout,
            "load purchase",
            self.store.load_purchase(purchase_id),
        )
        .await?
        .ok_or_else(|| RentalError::not_found("purchase", purchase_id))
    }
}

fn target_state(kind: &PaymentEventKind) -> PaymentState {
    match kind {
        PaymentEventKind::Succeeded => PaymentState::Captured,
        _ => PaymentState::Failed,
    }
}
