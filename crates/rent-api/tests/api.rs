use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use rent_api::{create_router, AppConfig, AppState, Stores};
use rent_core::{
    Currency, IntentRequest, IntentStatus, PaymentEvent, PaymentGateway, PaymentIntent, Plan,
    PlanCatalog, RentalError, RentalResult,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const SIGNATURE: &str = "t=1,v1=trusted";

/// Approves every intent; status and webhook payloads are driven by the test
struct FakeGateway {
    status: Mutex<IntentStatus>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(&self, request: &IntentRequest) -> RentalResult<PaymentIntent> {
        Ok(PaymentIntent {
            gateway_ref: gateway_ref_for(&request.purchase_id.to_string()),
            client_secret: Some(format!("secret_{}", request.purchase_id.simple())),
            status: IntentStatus::Pending,
        })
    }

    async fn intent_status(&self, _gateway_ref: &str) -> RentalResult<IntentStatus> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> RentalResult<PaymentEvent> {
        if signature != SIGNATURE {
            return Err(RentalError::WebhookVerificationFailed("Signature mismatch".into()));
        }
        serde_json::from_slice(payload).map_err(|e| RentalError::WebhookParse(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

fn gateway_ref_for(purchase_id: &str) -> String {
    format!("pi_{}", purchase_id.replace('-', ""))
}

struct Harness {
    server: TestServer,
    gateway: Arc<FakeGateway>,
}

fn harness() -> Harness {
    let gateway = Arc::new(FakeGateway {
        status: Mutex::new(IntentStatus::Pending),
    });
    let catalog = PlanCatalog::new()
        .with_plan(Plan::new("starter", "Starter Box", 100, 1000, Currency::USD))
        .with_plan(Plan {
            active: false,
            ..Plan::new("retired", "Retired Box", 10, 100, Currency::USD)
        });
    let state = AppState::new(AppConfig::default(), Stores::memory(), gateway.clone(), catalog);

    Harness {
        server: TestServer::new(create_router(state)).unwrap(),
        gateway,
    }
}

fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

impl Harness {
    /// Register and return (user, activation token)
    async fn register(&self, username: &str) -> (Value, String) {
        let response = self
            .server
            .post("/api/v1/users")
            .json(&json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "password": "correct horse battery"
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        let token = body["activation_token"]["token"].as_str().unwrap().to_string();
        (body["user"].clone(), token)
    }

    async fn login(&self, username: &str) -> String {
        let response = self
            .server
            .post("/api/v1/tokens/authentication")
            .json(&json!({ "username": username, "password": "correct horse battery" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let body: Value = response.json();
        body["authentication_token"]["token"].as_str().unwrap().to_string()
    }

    async fn activate(&self, activation_token: &str) {
        let (name, value) = bearer(activation_token);
        let response = self
            .server
            .put("/api/v1/users/activate")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    /// Registered, activated and logged in; returns the auth token
    async fn subscriber(&self, username: &str) -> String {
        let (_, activation) = self.register(username).await;
        self.activate(&activation).await;
        self.login(username).await
    }

    async fn subscribe(&self, token: &str, plan_id: &str) -> axum_test::TestResponse {
        let (name, value) = bearer(token);
        self.server
            .post("/api/v1/subscriptions")
            .add_header(name, value)
            .json(&json!({ "plan_id": plan_id }))
            .await
    }

    async fn get(&self, path: &str, token: &str) -> axum_test::TestResponse {
        let (name, value) = bearer(token);
        self.server.get(path).add_header(name, value).await
    }

    async fn post(&self, path: &str, token: &str) -> axum_test::TestResponse {
        let (name, value) = bearer(token);
        self.server.post(path).add_header(name, value).await
    }

    async fn balance(&self, token: &str) -> i64 {
        let body: Value = self.get("/api/v1/users/me", token).await.json();
        body["user"]["token_balance"].as_i64().unwrap()
    }

    async fn webhook(&self, event: Value) -> axum_test::TestResponse {
        self.server
            .post("/webhook/stripe")
            .add_header(
                HeaderName::from_static("stripe-signature"),
                HeaderValue::from_static(SIGNATURE),
            )
            .bytes(event.to_string().into())
            .await
    }
}

fn succeeded_event(subscription: &Value, event_id: &str) -> Value {
    let purchase_id = subscription["id"].as_str().unwrap();
    json!({
        "event_id": event_id,
        "kind": "succeeded",
        "provider": "fake",
        "gateway_ref": subscription["gateway_ref"],
        "purchase_id": purchase_id,
        "amount": subscription["price"],
        "currency": subscription["currency"],
        "timestamp": "2025-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn health_reports_healthy() {
    let h = harness();
    let body: Value = h.server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn registration_validates_input() {
    let h = harness();
    let response = h
        .server
        .post("/api/v1/users")
        .json(&json!({ "username": "al", "email": "no-at-sign", "password": "short" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    h.register("alice").await;
    let duplicate = h
        .server
        .post("/api/v1/users")
        .json(&json!({
            "username": "alice",
            "email": "other@example.com",
            "password": "correct horse battery"
        }))
        .await;
    assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn activation_token_only_activates() {
    let h = harness();
    let (user, activation) = h.register("alice").await;
    assert_eq!(user["activated"], false);
    assert!(user.get("password_hash").is_none());

    // Wrong scope for the API
    let me = h.get("/api/v1/users/me", &activation).await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);

    h.activate(&activation).await;

    // Activation tokens are revoked once used
    let (name, value) = bearer(&activation);
    let again = h.server.put("/api/v1/users/activate").add_header(name, value).await;
    assert_eq!(again.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authentication_token_cannot_activate() {
    let h = harness();
    h.register("alice").await;
    let auth = h.login("alice").await;

    let (name, value) = bearer(&auth);
    let response = h.server.put("/api/v1/users/activate").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_failures_are_generic() {
    let h = harness();
    h.register("alice").await;

    for body in [
        json!({ "username": "alice", "password": "wrong password" }),
        json!({ "username": "nobody", "password": "correct horse battery" }),
    ] {
        let response = h.server.post("/api/v1/tokens/authentication").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"], "unauthorized");
    }
}

#[tokio::test]
async fn malformed_authorization_is_rejected() {
    let h = harness();
    let token = h.subscriber("alice").await;

    for value in [
        format!("Token {}", token),
        format!("bearer {}", token),
        "Bearer ".to_string(),
        "Bearer not-a-real-token".to_string(),
    ] {
        let response = h
            .server
            .get("/api/v1/users/me")
            .add_header(AUTHORIZATION, HeaderValue::from_str(&value).unwrap())
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED, "{}", value);
    }

    let missing = h.server.get("/api/v1/users/me").await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_authentication_tokens() {
    let h = harness();
    let token = h.subscriber("alice").await;

    let (name, value) = bearer(&token);
    let response = h
        .server
        .delete("/api/v1/tokens/authentication")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::NO_CONTENT);

    let me = h.get("/api/v1/users/me", &token).await;
    assert_eq!(me.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn purchases_require_activation() {
    let h = harness();
    h.register("alice").await;
    let token = h.login("alice").await;

    let response = h.subscribe(&token, "starter").await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn only_active_catalog_plans_are_purchasable() {
    let h = harness();
    let token = h.subscriber("alice").await;

    let plans: Value = h.server.get("/api/v1/plans").await.json();
    assert_eq!(plans["count"], 1);

    assert_eq!(h.subscribe(&token, "missing").await.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(h.subscribe(&token, "retired").await.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn polling_confirmation_credits_once() {
    let h = harness();
    let token = h.subscriber("alice").await;

    let response = h.subscribe(&token, "starter").await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body: Value = response.json();
    let subscription = &body["subscription"];
    assert_eq!(subscription["payment_state"], "authorized");
    assert!(body["client_secret"].is_string());
    assert_eq!(h.balance(&token).await, 0);

    let id = subscription["id"].as_str().unwrap();
    let confirm_path = format!("/api/v1/subscriptions/{}/confirm", id);

    // Still pending at the gateway
    let pending: Value = h.post(&confirm_path, &token).await.json();
    assert_eq!(pending["subscription"]["payment_state"], "authorized");
    assert_eq!(h.balance(&token).await, 0);

    *h.gateway.status.lock().unwrap() = IntentStatus::Succeeded {
        amount: 1000,
        currency: Currency::USD,
    };

    let captured: Value = h.post(&confirm_path, &token).await.json();
    assert_eq!(captured["subscription"]["payment_state"], "captured");
    assert_eq!(h.balance(&token).await, 100);

    let again = h.post(&confirm_path, &token).await;
    assert_eq!(again.status_code(), StatusCode::OK);
    assert_eq!(h.balance(&token).await, 100);
}

#[tokio::test]
async fn webhook_capture_is_idempotent() {
    let h = harness();
    let token = h.subscriber("alice").await;
    let body: Value = h.subscribe(&token, "starter").await.json();
    let subscription = body["subscription"].clone();

    let first: Value = h.webhook(succeeded_event(&subscription, "evt_1")).await.json();
    assert_eq!(first["outcome"], "captured");

    let replay: Value = h.webhook(succeeded_event(&subscription, "evt_1")).await.json();
    assert_eq!(replay["outcome"], "already_applied");

    assert_eq!(h.balance(&token).await, 100);
}

#[tokio::test]
async fn webhook_requires_valid_signature() {
    let h = harness();

    let missing = h.server.post("/webhook/stripe").bytes("{}".into()).await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

    let forged = h
        .server
        .post("/webhook/stripe")
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_static("t=1,v1=forged"),
        )
        .bytes("{}".into())
        .await;
    assert_eq!(forged.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_with_wrong_amount_credits_nothing() {
    let h = harness();
    let token = h.subscriber("alice").await;
    let body: Value = h.subscribe(&token, "starter").await.json();

    let mut event = succeeded_event(&body["subscription"], "evt_short");
    event["amount"] = json!(1);

    let response: Value = h.webhook(event).await.json();
    assert_eq!(response["outcome"], "rejected");
    assert_eq!(h.balance(&token).await, 0);
}

#[tokio::test]
async fn canceled_purchase_is_never_credited() {
    let h = harness();
    let token = h.subscriber("alice").await;
    let body: Value = h.subscribe(&token, "starter").await.json();
    let subscription = body["subscription"].clone();
    let id = subscription["id"].as_str().unwrap();

    let canceled: Value = h
        .post(&format!("/api/v1/subscriptions/{}/cancel", id), &token)
        .await
        .json();
    assert_eq!(canceled["subscription"]["payment_state"], "failed");

    let late: Value = h.webhook(succeeded_event(&subscription, "evt_late")).await.json();
    assert_eq!(late["outcome"], "rejected");
    assert_eq!(h.balance(&token).await, 0);

    let cancel_again = h
        .post(&format!("/api/v1/subscriptions/{}/cancel", id), &token)
        .await;
    assert_eq!(cancel_again.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn subscriptions_are_private_to_their_owner() {
    let h = harness();
    let alice = h.subscriber("alice").await;
    let bob = h.subscriber("bobby").await;

    let body: Value = h.subscribe(&alice, "starter").await.json();
    let id = body["subscription"]["id"].as_str().unwrap().to_string();

    let own = h.get(&format!("/api/v1/subscriptions/{}", id), &alice).await;
    assert_eq!(own.status_code(), StatusCode::OK);

    let other = h.get(&format!("/api/v1/subscriptions/{}", id), &bob).await;
    assert_eq!(other.status_code(), StatusCode::NOT_FOUND);

    let cancel = h.post(&format!("/api/v1/subscriptions/{}/cancel", id), &bob).await;
    assert_eq!(cancel.status_code(), StatusCode::NOT_FOUND);

    let list: Value = h.get("/api/v1/subscriptions", &bob).await.json();
    assert_eq!(list["count"], 0);
}
