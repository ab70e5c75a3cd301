//! # In-Memory Store
//!
//! Implements every storage contract behind a single async mutex. The mutex
//! is the transactional boundary: a capture checks the purchase state,
//! credits the balance and flips the state inside one critical section.
//!
//! Used for development runs without `DATABASE_URL` and throughout the tests.

use crate::error::{RentalError, RentalResult};
use crate::purchase::{NewPurchase, PaymentState, PurchaseRecord};
use crate::store::{CredentialStore, EntitlementStore, UserStore};
use crate::token::{Scope, TokenHash, TokenRecord};
use crate::user::{NewUser, SubjectId, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    tokens: HashMap<TokenHash, TokenRecord>,
    users: HashMap<SubjectId, User>,
    next_user_id: SubjectId,
    purchases: HashMap<Uuid, PurchaseRecord>,
}

impl Inner {
    fn purchase_mut(&mut self, id: Uuid) -> RentalResult<&mut PurchaseRecord> {
        self.purchases
            .get_mut(&id)
            .ok_or_else(|| RentalError::not_found("purchase", id))
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of credential records currently held (expired or not)
    pub async fn token_count(&self) -> usize {
        self.inner.lock().await.tokens.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, record: &TokenRecord) -> RentalResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tokens.contains_key(&record.hash) {
            return Err(RentalError::Conflict("token hash already exists".to_string()));
        }
        inner.tokens.insert(record.hash, record.clone());
        Ok(())
    }

    async fn find_unexpired(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> RentalResult<Option<SubjectId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .get(hash)
            .filter(|r| r.scope == scope && r.is_live_at(now))
            .map(|r| r.subject_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RentalResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.tokens.len();
        inner.tokens.retain(|_, r| r.expires_at >= now);
        Ok((before - inner.tokens.len()) as u64)
    }

    async fn delete_for_subject(&self, subject_id: SubjectId, scope: Scope) -> RentalResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.tokens.len();
        inner
            .tokens
            .retain(|_, r| !(r.subject_id == subject_id && r.scope == scope));
        Ok((before - inner.tokens.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> RentalResult<User> {
        let mut inner = self.inner.lock().await;

        if inner
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(RentalError::Conflict(
                "a user with this username or email already exists".to_string(),
            ));
        }

        inner.next_user_id += 1;
        let created = User {
            id: inner.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            activated: false,
            token_balance: 0,
            created_at: Utc::now(),
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_username(&self, username: &str) -> RentalResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: SubjectId) -> RentalResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn activate(&self, id: SubjectId) -> RentalResult<User> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| RentalError::not_found("user", id))?;
        user.activated = true;
        Ok(user.clone())
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn create_purchase(&self, purchase: NewPurchase) -> RentalResult<PurchaseRecord> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&purchase.subject_id) {
            return Err(RentalError::not_found("user", purchase.subject_id));
        }
        let record = PurchaseRecord::initiated(purchase);
        inner.purchases.insert(record.id, record.clone());
        Ok(record)
    }

    async fn load_purchase(&self, id: Uuid) -> RentalResult<Option<PurchaseRecord>> {
        Ok(self.inner.lock().await.purchases.get(&id).cloned())
    }

    async fn purchases_for_subject(&self, subject_id: SubjectId) -> RentalResult<Vec<PurchaseRecord>> {
        let inner = self.inner.lock().await;
        let mut purchases: Vec<_> = inner
            .purchases
            .values()
            .filter(|p| p.subject_id == subject_id)
            .cloned()
            .collect();
        purchases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(purchases)
    }

    async fn mark_authorized(&self, id: Uuid, gateway_ref: &str) -> RentalResult<PurchaseRecord> {
        let mut inner = self.inner.lock().await;
        let purchase = inner.purchase_mut(id)?;
        if purchase.payment_state != PaymentState::Initiated {
            return Err(purchase.invalid_state("initiated"));
        }
        purchase.payment_state = PaymentState::Authorized;
        purchase.gateway_ref = Some(gateway_ref.to_string());
        purchase.updated_at = Utc::now();
        Ok(purchase.clone())
    }

    async fn mark_failed(&self, id: Uuid) -> RentalResult<PurchaseRecord> {
        let mut inner = self.inner.lock().await;
        let purchase = inner.purchase_mut(id)?;
        if !purchase.payment_state.can_transition_to(PaymentState::Failed) {
            return Err(purchase.invalid_state("initiated or authorized"));
        }
        purchase.payment_state = PaymentState::Failed;
        purchase.updated_at = Utc::now();
        Ok(purchase.clone())
    }

    async fn credit_balance_and_mark_captured(
        &self,
        subject_id: SubjectId,
        amount: i64,
        purchase_id: Uuid,
    ) -> RentalResult<i64> {
        let mut inner = self.inner.lock().await;

        // Every check happens before either write.
        let purchase = inner
            .purchases
            .get(&purchase_id)
            .ok_or_else(|| RentalError::not_found("purchase", purchase_id))?;
        if purchase.payment_state != PaymentState::Authorized {
            return Err(purchase.invalid_state("authorized"));
        }
        if purchase.subject_id != subject_id {
            return Err(RentalError::Internal(format!(
                "purchase {} does not belong to subject {}",
                purchase_id, subject_id
            )));
        }
        let balance = inner
            .users
            .get(&subject_id)
            .ok_or_else(|| RentalError::not_found("user", subject_id))?
            .token_balance;
        let new_balance = balance
            .checked_add(amount)
            .ok_or_else(|| RentalError::Internal("token balance overflow".to_string()))?;

        if let Some(user) = inner.users.get_mut(&subject_id) {
            user.token_balance = new_balance;
        }
        if let Some(purchase) = inner.purchases.get_mut(&purchase_id) {
            purchase.payment_state = PaymentState::Captured;
            purchase.updated_at = Utc::now();
        }

        Ok(new_balance)
    }
}
