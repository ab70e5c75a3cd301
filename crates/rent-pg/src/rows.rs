//! Row types and their conversion into domain records.

use chrono::{DateTime, Utc};
use rent_core::{Currency, PaymentState, PurchaseRecord, RentalError, RentalResult, User};
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, password_hash, activated, token_balance, created_at";

pub(crate) const PURCHASE_COLUMNS: &str = "id, user_id, plan_id, plan_tokens, price, currency, \
     payment_state, gateway_ref, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
    pub token_balance: i64,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            activated: row.activated,
            token_balance: row.token_balance,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PurchaseRow {
    pub id: Uuid,
    pub user_id: i64,
    pub plan_id: String,
    pub plan_tokens: i64,
    pub price: i64,
    pub currency: String,
    pub payment_state: String,
    pub gateway_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for PurchaseRecord {
    type Error = RentalError;

    fn try_from(row: PurchaseRow) -> RentalResult<Self> {
        let currency: Currency = row.currency.parse().map_err(|_| {
            RentalError::Storage(format!(
                "purchase {} has unknown currency {:?}",
                row.id, row.currency
            ))
        })?;
        let payment_state: PaymentState = row.payment_state.parse()?;

        Ok(PurchaseRecord {
            id: row.id,
            subject_id: row.user_id,
            plan_id: row.plan_id,
            plan_tokens: row.plan_tokens,
            price: row.price,
            currency,
            payment_state,
            gateway_ref: row.gateway_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
