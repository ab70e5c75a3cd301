//! # Storage Contracts
//!
//! The credential engine and the entitlement ledger take their storage as
//! trait objects. Implementations: [`crate::memory::MemoryStore`] and the
//! PostgreSQL store in `rent-pg`.

use crate::error::RentalResult;
use crate::purchase::{NewPurchase, PurchaseRecord};
use crate::token::{Scope, TokenHash, TokenRecord};
use crate::user::{NewUser, SubjectId, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Persistence for credential records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(&self, record: &TokenRecord) -> RentalResult<()>;

    /// Subject owning a record with this hash and scope that is still live at `now`
    async fn find_unexpired(
        &self,
        hash: &TokenHash,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> RentalResult<Option<SubjectId>>;

    /// Delete every record with `expires_at < now`; returns how many went
    async fn delete_expired(&self, now: DateTime<Utc>) -> RentalResult<u64>;

    /// Delete every record of `scope` belonging to `subject_id`
    async fn delete_for_subject(&self, subject_id: SubjectId, scope: Scope) -> RentalResult<u64>;
}

/// Persistence for principals
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the username or email is taken
    async fn create_user(&self, user: NewUser) -> RentalResult<User>;

    async fn find_by_username(&self, username: &str) -> RentalResult<Option<User>>;

    async fn find_by_id(&self, id: SubjectId) -> RentalResult<Option<User>>;

    /// Mark a user as activated; `NotFound` if absent
    async fn activate(&self, id: SubjectId) -> RentalResult<User>;
}

/// Persistence for purchases and balances. Every transition is guarded on the
/// current state inside the store, so a racing caller sees `InvalidState`.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Record an `Initiated` purchase
    async fn create_purchase(&self, purchase: NewPurchase) -> RentalResult<PurchaseRecord>;

    async fn load_purchase(&self, id: Uuid) -> RentalResult<Option<PurchaseRecord>>;

    /// Newest first
    async fn purchases_for_subject(&self, subject_id: SubjectId) -> RentalResult<Vec<PurchaseRecord>>;

    /// `Initiated → Authorized`, storing the gateway reference
    async fn mark_authorized(&self, id: Uuid, gateway_ref: &str) -> RentalResult<PurchaseRecord>;

    /// `Initiated | Authorized → Failed`
    async fn mark_failed(&self, id: Uuid) -> RentalResult<PurchaseRecord>;

    /// One atomic unit: balance += `amount` and `Authorized → Captured`.
    /// Either both writes are visible or neither. Returns the new balance.
    async fn credit_balance_and_mark_captured(
        &self,
        subject_id: SubjectId,
        amount: i64,
        purchase_id: Uuid,
    ) -> RentalResult<i64>;
}

pub type SharedCredentialStore = Arc<dyn CredentialStore>;
pub type SharedUserStore = Arc<dyn UserStore>;
pub type SharedEntitlementStore = Arc<dyn EntitlementStore>;
