//! # rent-pg
//!
//! PostgreSQL implementation of the `rent-core` storage contracts.
//!
//! The capture unit runs in one SQL transaction: a state-guarded
//! `UPDATE purchases ... WHERE payment_state = 'authorized'` followed by the
//! balance increment. If either statement fails nothing is committed.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rent_core::{
    CredentialStore, EntitlementStore, NewPurchase, NewUser, PurchaseRecord, RentalError,
    RentalResult, Scope, SubjectId, TokenHash, TokenRecord, User, UserStore,
};
use rows::{PurchaseRow, UserRow, PURCHASE_COLUMNS, USER_COLUMNS};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Explain why a state-guarded update matched no row
    async fn guard_failure(&self, id: Uuid, expected: &'static str) -> RentalError {
        match self.load_purchase(id).await {
            Ok(Some(purchase)) => purchase.invalid_state(expected),
            Ok(None) => RentalError::not_found("purchase", id),
            Err(e) => e,
        }
    }
}

fn db_error(e: sqlx::Error) -> RentalError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return RentalError::Conflict(db.message().to_string());
        }
    }
    RentalError::Storage(e.to_string())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

// -- Credential Operations --

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert(&self, record: &TokenRecord) -> RentalResult<()> {
        sqlx::query("INSERT INTO tokens (hash, user_id, scope, expiry) VALUES ($1, $2, $3, $4)")
            .bind(record.hash.as_bytes())
            .bind(record.subject_id)
            .bind(record.scope.as_str())
            .bind(record.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    RentalError::not_found("user", record.subject_id)
                } else {
                    db_error(e)
                }
            })?;
        Ok(())
    }

    async fn find_unexpired(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> RentalResult<Option<SubjectId>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM tokens WHERE hash = $1 AND scope = $2 AND expiry > $3",
        )
        .bind(hash.as_bytes())
        .bind(scope.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RentalResult<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE expiry < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_for_subject(&self, subject_id: SubjectId, scope: Scope) -> RentalResult<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(subject_id)
            .bind(scope.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

// -- User Operations --

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> RentalResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_error(e) {
            RentalError::Conflict(_) => RentalError::Conflict(
                "a user with this username or email already exists".to_string(),
            ),
            other => other,
        })?;
        Ok(row.into())
    }

    async fn find_by_username(&self, username: &str) -> RentalResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: SubjectId) -> RentalResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(User::from))
    }

    async fn activate(&self, id: SubjectId) -> RentalResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET activated = TRUE WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(User::from)
            .ok_or_else(|| RentalError::not_found("user", id))
    }
}

// -- Purchase Operations --

#[async_trait]
impl EntitlementStore for PgStore {
    async fn create_purchase(&self, purchase: NewPurchase) -> RentalResult<PurchaseRecord> {
        let subject_id = purchase.subject_id;
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            r#"INSERT INTO purchases (id, user_id, plan_id, plan_tokens, price, currency)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {}"#,
            PURCHASE_COLUMNS
        ))
        .bind(purchase.id)
        .bind(purchase.subject_id)
        .bind(&purchase.plan_id)
        .bind(purchase.plan_tokens)
        .bind(purchase.price)
        .bind(purchase.currency.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                RentalError::not_found("user", subject_id)
            } else {
                db_error(e)
            }
        })?;
        row.try_into()
    }

    async fn load_purchase(&self, id: Uuid) -> RentalResult<Option<PurchaseRecord>> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {} FROM purchases WHERE id = $1",
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(PurchaseRecord::try_from).transpose()
    }

    async fn purchases_for_subject(&self, subject_id: SubjectId) -> RentalResult<Vec<PurchaseRecord>> {
        let rows = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {} FROM purchases WHERE user_id = $1 ORDER BY created_at DESC",
            PURCHASE_COLUMNS
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(PurchaseRecord::try_from).collect()
    }

    async fn mark_authorized(&self, id: Uuid, gateway_ref: &str) -> RentalResult<PurchaseRecord> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            r#"UPDATE purchases
               SET payment_state = 'authorized', gateway_ref = $2, updated_at = NOW()
               WHERE id = $1 AND payment_state = 'initiated'
               RETURNING {}"#,
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .bind(gateway_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.guard_failure(id, "initiated").await),
        }
    }

    async fn mark_failed(&self, id: Uuid) -> RentalResult<PurchaseRecord> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            r#"UPDATE purchases
               SET payment_state = 'failed', updated_at = NOW()
               WHERE id = $1 AND payment_state IN ('initiated', 'authorized')
               RETURNING {}"#,
            PURCHASE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.guard_failure(id, "initiated or authorized").await),
        }
    }

    async fn credit_balance_and_mark_captured(
        &self,
        subject_id: SubjectId,
        amount: i64,
        purchase_id: Uuid,
    ) -> RentalResult<i64> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let captured = sqlx::query_scalar::<_, Uuid>(
            r#"UPDATE purchases
               SET payment_state = 'captured', updated_at = NOW()
               WHERE id = $1 AND user_id = $2 AND payment_state = 'authorized'
               RETURNING id"#,
        )
        .bind(purchase_id)
        .bind(subject_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        if captured.is_none() {
            tx.rollback().await.map_err(db_error)?;
            return Err(match self.load_purchase(purchase_id).await? {
                Some(p) if p.subject_id != subject_id => RentalError::Internal(format!(
                    "purchase {} does not belong to subject {}",
                    purchase_id, subject_id
                )),
                Some(p) => p.invalid_state("authorized"),
                None => RentalError::not_found("purchase", purchase_id),
            });
        }

        // Dropping `tx` on any early return rolls the state change back.
        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET token_balance = token_balance + $1 WHERE id = $2 RETURNING token_balance",
        )
        .bind(amount)
        .bind(subject_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| RentalError::not_found("user", subject_id))?;

        tx.commit().await.map_err(db_error)?;
        debug!(%purchase_id, subject_id, balance, "capture committed");

        Ok(balance)
    }
}
