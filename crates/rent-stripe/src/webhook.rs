//! # Stripe Webhook Handling
//!
//! Signature verification and parsing of PaymentIntent events.
//!
//! Stripe signs `"{timestamp}.{payload}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<ts>,v1=<hex>[,v1=<hex>...]`.

use chrono::{DateTime, Utc};
use rent_core::{Currency, PaymentEvent, PaymentEventKind, RentalError, RentalResult};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

/// Events that should be enabled in the Stripe Dashboard
pub const REQUIRED_WEBHOOK_EVENTS: &[&str] = &[
    "payment_intent.succeeded",
    "payment_intent.payment_failed",
    "payment_intent.canceled",
];

/// Verify a `Stripe-Signature` header against the raw payload
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> RentalResult<()> {
    let sig_parts = parse_signature_header(header)?;

    if now.abs_diff(sig_parts.timestamp) > tolerance_secs.unsigned_abs() {
        return Err(RentalError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let signed_payload = format!("{}.{}", sig_parts.timestamp, String::from_utf8_lossy(payload));
    let expected_sig = compute_hmac_sha256(secret, &signed_payload)?;

    let valid = sig_parts
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected_sig));

    if !valid {
        return Err(RentalError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    Ok(())
}

/// Parse a verified payload into a [`PaymentEvent`]
pub fn parse_event(payload: &[u8]) -> RentalResult<PaymentEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| RentalError::WebhookParse(format!("Failed to parse webhook: {}", e)))?;

    debug!("Verified Stripe webhook: type={}", event.event_type);

    let kind = match event.event_type.as_str() {
        "payment_intent.succeeded" => PaymentEventKind::Succeeded,
        "payment_intent.payment_failed" => PaymentEventKind::Failed,
        "payment_intent.canceled" => PaymentEventKind::Canceled,
        other => PaymentEventKind::Unknown(other.to_string()),
    };

    let object = &event.data.object;

    let gateway_ref = object.get("id").and_then(|v| v.as_str()).map(String::from);

    let purchase_id = object
        .get("metadata")
        .and_then(|m| m.get("purchase_id"))
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let amount = object
        .get("amount_received")
        .and_then(|v| v.as_i64())
        .filter(|amount| *amount > 0)
        .or_else(|| object.get("amount").and_then(|v| v.as_i64()));

    let currency = object
        .get("currency")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Currency>().ok());

    let failure_reason = object
        .get("last_payment_error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| {
            object
                .get("cancellation_reason")
                .and_then(|v| v.as_str())
                .map(String::from)
        });

    Ok(PaymentEvent {
        event_id: event.id,
        kind,
        provider: "stripe".to_string(),
        gateway_ref,
        purchase_id,
        amount,
        currency,
        failure_reason,
        timestamp: DateTime::from_timestamp(event.created, 0).unwrap_or_else(Utc::now),
    })
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// Signature Verification
// =============================================================================

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> RentalResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        RentalError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(RentalError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Hex HMAC-SHA256 of `message` under `secret`
pub fn compute_hmac_sha256(secret: &str, message: &str) -> RentalResult<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| RentalError::Configuration(format!("invalid webhook secret: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn signed(payload: &str, ts: i64) -> String {
        let sig = compute_hmac_sha256(SECRET, &format!("{}.{}", ts, payload)).unwrap();
        format!("t={},v1={}", ts, sig)
    }

    fn succeeded_payload(purchase_id: Uuid) -> String {
        json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "pi_123",
                    "object": "payment_intent",
                    "amount": 1000,
                    "amount_received": 1000,
                    "currency": "usd",
                    "status": "succeeded",
                    "metadata": { "purchase_id": purchase_id.to_string(), "subject_id": "42" }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_signature_header() {
        let parsed = parse_signature_header("t=1234567890,v1=abc123,v1=def456").unwrap();

        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);
        assert!(parse_signature_header("v1=abc").is_err());
        assert!(parse_signature_header("t=1").is_err());
    }

    #[test]
    fn test_verify_signature() {
        let payload = succeeded_payload(Uuid::new_v4());
        let now = 1_700_000_100;
        let header = signed(&payload, now);

        assert!(verify_signature(SECRET, payload.as_bytes(), &header, now, 300).is_ok());
        assert!(verify_signature("whsec_other", payload.as_bytes(), &header, now, 300).is_err());
        assert!(verify_signature(SECRET, b"{}", &header, now, 300).is_err());
    }

    #[test]
    fn test_stale_signature_rejected() {
        let payload = succeeded_payload(Uuid::new_v4());
        let header = signed(&payload, 1_700_000_000);

        let result = verify_signature(SECRET, payload.as_bytes(), &header, 1_700_001_000, 300);
        assert!(matches!(result, Err(RentalError::WebhookVerificationFailed(_))));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        let now = 1_700_000_000;
        let unsigned = verify_signature(SECRET, b"{}", "t=-9223372036854775808,v1=00", now, 300);
        assert!(matches!(unsigned, Err(RentalError::WebhookVerificationFailed(_))));

        // Correctly signed, but far outside the window in both directions.
        for ts in [i64::MIN, now.wrapping_add(i64::MIN), i64::MAX] {
            let header = signed("{}", ts);
            let result = verify_signature(SECRET, b"{}", &header, now, 300);
            assert!(matches!(result, Err(RentalError::WebhookVerificationFailed(_))));
        }
    }

    #[test]
    fn test_parse_succeeded_event() {
        let purchase_id = Uuid::new_v4();
        let event = parse_event(succeeded_payload(purchase_id).as_bytes()).unwrap();

        assert_eq!(event.event_id, "evt_123");
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.gateway_ref.as_deref(), Some("pi_123"));
        assert_eq!(event.purchase_id, Some(purchase_id));
        assert_eq!(event.amount, Some(1000));
        assert_eq!(event.currency, Some(Currency::USD));
        assert!(event.confirmation().is_some());
    }

    #[test]
    fn test_parse_failed_event() {
        let payload = json!({
            "id": "evt_456",
            "type": "payment_intent.payment_failed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "pi_456",
                    "amount": 1000,
                    "amount_received": 0,
                    "currency": "usd",
                    "last_payment_error": { "message": "Your card was declined." },
                    "metadata": {}
                }
            }
        })
        .to_string();

        let event = parse_event(payload.as_bytes()).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Failed);
        assert_eq!(event.failure_reason.as_deref(), Some("Your card was declined."));
        assert_eq!(event.purchase_id, None);
        assert!(event.confirmation().is_none());
    }

    #[test]
    fn test_unknown_event_type() {
        let payload = json!({
            "id": "evt_789",
            "type": "charge.refunded",
            "created": 1_700_000_000,
            "data": { "object": { "id": "ch_1" } }
        })
        .to_string();

        let event = parse_event(payload.as_bytes()).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Unknown("charge.refunded".into()));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
