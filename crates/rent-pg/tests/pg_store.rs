//! Runs against a live database: `DATABASE_URL=postgres://... cargo test -p rent-pg -- --ignored`

use rent_core::{
    CredentialStore, EntitlementStore, NewPurchase, NewUser, PaymentState, RentalError, Scope,
    TokenRecord, UserStore,
};
use rent_core::{Currency, TokenHash};
use rent_pg::PgStore;
use uuid::Uuid;

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    store
}

async fn user(store: &PgStore) -> rent_core::User {
    let suffix = Uuid::new_v4().simple().to_string();
    store
        .create_user(NewUser {
            username: format!("u{}", &suffix[..12]),
            email: format!("{}@example.com", suffix),
            password_hash: "x".into(),
        })
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn capture_credits_exactly_once() {
    let store = store().await;
    let user = user(&store).await;

    let purchase = store
        .create_purchase(NewPurchase {
            id: Uuid::new_v4(),
            subject_id: user.id,
            plan_id: "starter".into(),
            plan_tokens: 100,
            price: 1000,
            currency: Currency::USD,
        })
        .await
        .unwrap();
    store
        .mark_authorized(purchase.id, &format!("pi_{}", purchase.id.simple()))
        .await
        .unwrap();

    let balance = store
        .credit_balance_and_mark_captured(user.id, 100, purchase.id)
        .await
        .unwrap();
    assert_eq!(balance, 100);

    let again = store
        .credit_balance_and_mark_captured(user.id, 100, purchase.id)
        .await;
    assert!(matches!(
        again,
        Err(RentalError::InvalidState {
            current: PaymentState::Captured,
            ..
        })
    ));

    let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(reloaded.token_balance, 100);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn tokens_are_scoped_and_expire() {
    let store = store().await;
    let user = user(&store).await;
    let now = chrono::Utc::now();

    let hash = TokenHash::of(&Uuid::new_v4().simple().to_string());
    store
        .insert(&TokenRecord {
            hash,
            subject_id: user.id,
            scope: Scope::Authentication,
            expires_at: now + chrono::Duration::hours(1),
        })
        .await
        .unwrap();

    assert_eq!(
        store.find_unexpired(&hash, Scope::Authentication, now).await.unwrap(),
        Some(user.id)
    );
    assert_eq!(
        store.find_unexpired(&hash, Scope::Activation, now).await.unwrap(),
        None
    );
    assert_eq!(
        store
            .find_unexpired(&hash, Scope::Authentication, now + chrono::Duration::hours(2))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        store.delete_for_subject(user.id, Scope::Authentication).await.unwrap(),
        1
    );
}
