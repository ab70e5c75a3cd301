//! # Stripe Payment Intents
//!
//! `PaymentGateway` backed by the Stripe PaymentIntents API. The purchase id
//! doubles as the idempotency key so a retried create never opens a second
//! intent.

use crate::config::StripeConfig;
use crate::webhook;
use async_trait::async_trait;
use chrono::Utc;
use rent_core::{
    Currency, IntentRequest, IntentStatus, PaymentEvent, PaymentGateway, PaymentIntent,
    RentalError, RentalResult,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

const PROVIDER: &str = "stripe";

/// Stripe PaymentIntent gateway
pub struct StripeIntentGateway {
    config: StripeConfig,
    client: Client,
}

impl StripeIntentGateway {
    /// Create a new gateway from explicit configuration
    pub fn new(config: StripeConfig) -> RentalResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RentalError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> RentalResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    fn intent_form(request: &IntentRequest) -> Vec<(String, String)> {
        vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.as_str().to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            (
                "metadata[purchase_id]".to_string(),
                request.purchase_id.to_string(),
            ),
            (
                "metadata[subject_id]".to_string(),
                request.subject_id.to_string(),
            ),
        ]
    }

    /// Send a request and decode the body, mapping Stripe errors
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RentalResult<T> {
        let response = request
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            error!("Stripe API error: status={}, body={}", status, body);

            if let Ok(error_response) = serde_json::from_str::<StripeErrorResponse>(&body) {
                return Err(RentalError::payment(PROVIDER, error_response.error.message));
            }

            return Err(RentalError::payment(
                PROVIDER,
                format!("HTTP {}: {}", status, body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            RentalError::payment(PROVIDER, format!("Failed to parse Stripe response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeIntentGateway {
    #[instrument(skip(self, request), fields(purchase_id = %request.purchase_id))]
    async fn create_intent(&self, request: &IntentRequest) -> RentalResult<PaymentIntent> {
        if request.amount <= 0 {
            return Err(RentalError::Validation(
                "intent amount must be positive".to_string(),
            ));
        }

        debug!(
            "Creating Stripe payment intent: amount={}, currency={}",
            request.amount, request.currency
        );

        let url = format!("{}/v1/payment_intents", self.config.api_base_url);
        let intent: StripePaymentIntent = self
            .send(
                self.client
                    .post(&url)
                    .header("Idempotency-Key", request.purchase_id.to_string())
                    .form(&Self::intent_form(request)),
            )
            .await?;

        info!("Created Stripe payment intent: id={}", intent.id);

        let status = intent.status();
        Ok(PaymentIntent {
            gateway_ref: intent.id,
            client_secret: intent.client_secret,
            status,
        })
    }

    #[instrument(skip(self))]
    async fn intent_status(&self, gateway_ref: &str) -> RentalResult<IntentStatus> {
        if gateway_ref.is_empty() || gateway_ref.contains('/') {
            return Err(RentalError::Validation(format!(
                "invalid payment intent id: {:?}",
                gateway_ref
            )));
        }

        let url = format!("{}/v1/payment_intents/{}", self.config.api_base_url, gateway_ref);
        let intent: StripePaymentIntent = self.send(self.client.get(&url)).await?;

        Ok(intent.status())
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> RentalResult<PaymentEvent> {
        webhook::verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            Utc::now().timestamp(),
            self.config.webhook_tolerance_secs,
        )?;
        webhook::parse_event(payload)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Transport failures. Client-side timeouts read as gateway timeouts so the
/// ledger leaves the purchase open for reconciliation.
fn network_error(e: reqwest::Error) -> RentalError {
    if e.is_timeout() {
        RentalError::payment_timeout(PROVIDER, format!("request timed out: {}", e))
    } else {
        RentalError::payment(PROVIDER, format!("network error: {}", e))
    }
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_received: i64,
    currency: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

impl StripePaymentIntent {
    fn status(&self) -> IntentStatus {
        match self.status.as_str() {
            "succeeded" => match self.currency.parse::<Currency>() {
                Ok(currency) => IntentStatus::Succeeded {
                    amount: if self.amount_received > 0 {
                        self.amount_received
                    } else {
                        self.amount
                    },
                    currency,
                },
                Err(_) => IntentStatus::Failed {
                    reason: format!("unsupported currency {}", self.currency),
                },
            },
            "canceled" => IntentStatus::Canceled,
            "requires_payment_method" if self.last_payment_error.is_some() => {
                IntentStatus::Failed {
                    reason: self
                        .last_payment_error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default(),
                }
            }
            _ => IntentStatus::Pending,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(default)]
    message: String,
}
