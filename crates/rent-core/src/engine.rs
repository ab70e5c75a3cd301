//! # Token Engine
//!
//! Issues scoped, expiring bearer credentials and validates them.
//!
//! Validation never trusts the reclamation loop: the store lookup itself is
//! filtered on scope and expiry, so an expired record that has not been swept
//! yet is still rejected.

use crate::error::{store_deadline, RentalError, RentalResult};
use crate::store::SharedCredentialStore;
use crate::token::{validate_plaintext, Credential, Scope, TokenHash};
use crate::user::SubjectId;
use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument};

/// Default deadline for a single credential store call
pub const DEFAULT_STORE_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// Issues and validates credentials against a [`crate::store::CredentialStore`]
#[derive(Clone)]
pub struct TokenEngine {
    store: SharedCredentialStore,
    store_timeout: StdDuration,
}

impl TokenEngine {
    pub fn new(store: SharedCredentialStore) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Builder: bound every store call by `timeout`
    pub fn with_store_timeout(mut self, timeout: StdDuration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Issue a credential for `subject_id`, valid for `ttl` in `scope`.
    ///
    /// Only the digest is persisted. The returned [`Credential`] is the one
    /// and only place the plaintext appears.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        subject_id: SubjectId,
        ttl: Duration,
        scope: Scope,
    ) -> RentalResult<Credential> {
        if ttl <= Duration::zero() {
            return Err(RentalError::Validation(
                "token ttl must be positive".to_string(),
            ));
        }

        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| RentalError::Validation("token ttl out of range".to_string()))?;
        let credential = Credential::generate(subject_id, scope, expires_at);

        store_deadline(
            self.store_timeout,
            "token insert",
            self.store.insert(&credential.record()),
        )
        .await?;

        debug!(subject_id, expires_at = %credential.expires_at, "issued token");
        Ok(credential)
    }

    /// Resolve the subject owning `plaintext` in `required_scope`.
    ///
    /// Malformed input fails with `Validation`; anything else that does not
    /// match (unknown, expired, other scope) is an opaque `Unauthorized`.
    #[instrument(skip(self, plaintext))]
    pub async fn validate(
        &self,
        plaintext: &str,
        required_scope: Scope,
    ) -> RentalResult<SubjectId> {
        validate_plaintext(plaintext)?;

        let hash = TokenHash::of(plaintext);
        let found = store_deadline(
            self.store_timeout,
            "token lookup",
            self.store.find_unexpired(&hash, required_scope, Utc::now()),
        )
        .await?;

        match found {
            Some(subject_id) => Ok(subject_id),
            None => {
                debug!("no live token for presented credential");
                Err(RentalError::Unauthorized)
            }
        }
    }

    /// Delete every credential of `scope` held by `subject_id`
    #[instrument(skip(self))]
    pub async fn revoke(&self, subject_id: SubjectId, scope: Scope) -> RentalResult<u64> {
        let removed = store_deadline(
            self.store_timeout,
            "token revoke",
            self.store.delete_for_subject(subject_id, scope),
        )
        .await?;

        debug!(subject_id, removed, "revoked tokens");
        Ok(removed)
    }

    /// Delete all credentials that expired before now. One reclamation tick.
    pub async fn sweep_expired(&self) -> RentalResult<u64> {
        let removed = store_deadline(
            self.store_timeout,
            "token sweep",
            self.store.delete_expired(Utc::now()),
        )
        .await?;

        if removed > 0 {
            info!(removed, "reclaimed expired tokens");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::CredentialStore;
    use crate::token::TokenRecord;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Arc;

    fn engine() -> (TokenEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TokenEngine::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_issue_then_validate_same_scope() {
        let (engine, _) = engine();
        let cred = engine
            .issue(42, Duration::hours(1), Scope::Authentication)
            .await
            .unwrap();

        let subject = engine
            .validate(&cred.plaintext, Scope::Authentication)
            .await
            .unwrap();
        assert_eq!(subject, 42);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_validation_error() {
        let (engine, store) = engine();
        let result = engine
            .issue(1, Duration::seconds(i64::MAX / 1000), Scope::Authentication)
            .await;

        assert!(matches!(result, Err(RentalError::Validation(_))));
        assert_eq!(store.delete_expired(DateTime::<Utc>::MAX_UTC).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activation_token_rejected_for_authentication() {
        let (engine, _) = engine();
        let cred = engine
            .issue(42, Duration::hours(1), Scope::Activation)
            .await
            .unwrap();

        let result = engine.validate(&cred.plaintext, Scope::Authentication).await;
        assert!(matches!(result, Err(RentalError::Unauthorized)));

        assert_eq!(
            engine.validate(&cred.plaintext, Scope::Activation).await.unwrap(),
            42
        );
    }

    #[tokio::test]
    async fn test_expired_token_rejected_without_sweep() {
        let (engine, store) = engine();
        let cred = engine
            .issue(7, Duration::milliseconds(20), Scope::Authentication)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(60)).await;

        let result = engine.validate(&cred.plaintext, Scope::Authentication).await;
        assert!(matches!(result, Err(RentalError::Unauthorized)));
        // Still stored: rejection came from the expiry filter, not the sweep.
        assert_eq!(store.token_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_and_validate_still_fails() {
        let (engine, store) = engine();
        let expired = engine
            .issue(7, Duration::milliseconds(20), Scope::Authentication)
            .await
            .unwrap();
        let live = engine
            .issue(8, Duration::hours(1), Scope::Authentication)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(60)).await;

        assert_eq!(engine.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.token_count().await, 1);
        assert!(matches!(
            engine.validate(&expired.plaintext, Scope::Authentication).await,
            Err(RentalError::Unauthorized)
        ));
        assert_eq!(
            engine.validate(&live.plaintext, Scope::Authentication).await.unwrap(),
            8
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens() {
        let (engine, _) = engine();

        assert!(matches!(
            engine.validate("", Scope::Authentication).await,
            Err(RentalError::Validation(_))
        ));
        assert!(matches!(
            engine.validate("too-short", Scope::Authentication).await,
            Err(RentalError::Validation(_))
        ));
        assert!(matches!(
            engine
                .validate(&"0".repeat(crate::token::TOKEN_PLAINTEXT_LEN), Scope::Authentication)
                .await,
            Err(RentalError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_non_positive_ttl_rejected() {
        let (engine, store) = engine();

        let result = engine.issue(1, Duration::zero(), Scope::Activation).await;
        assert!(matches!(result, Err(RentalError::Validation(_))));
        assert_eq!(store.token_count().await, 0);
    }

    #[tokio::test]
    async fn test_revoke_is_scoped() {
        let (engine, _) = engine();
        let auth = engine
            .issue(5, Duration::hours(1), Scope::Authentication)
            .await
            .unwrap();
        let activation = engine
            .issue(5, Duration::hours(1), Scope::Activation)
            .await
            .unwrap();

        assert_eq!(engine.revoke(5, Scope::Activation).await.unwrap(), 1);

        assert!(engine.validate(&activation.plaintext, Scope::Activation).await.is_err());
        assert!(engine.validate(&auth.plaintext, Scope::Authentication).await.is_ok());
    }

    struct FailingStore;

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn insert(&self, _record: &TokenRecord) -> RentalResult<()> {
            Err(RentalError::Storage("disk full".into()))
        }

        async fn find_unexpired(
            &self,
            _hash: &TokenHash,
            _scope: Scope,
            _now: DateTime<Utc>,
        ) -> RentalResult<Option<SubjectId>> {
            Err(RentalError::Storage("connection refused".into()))
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> RentalResult<u64> {
            Err(RentalError::Storage("connection refused".into()))
        }

        async fn delete_for_subject(&self, _subject_id: SubjectId, _scope: Scope) -> RentalResult<u64> {
            Err(RentalError::Storage("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_failures_surface() {
        let engine = TokenEngine::new(Arc::new(FailingStore));

        assert!(matches!(
            engine.issue(1, Duration::hours(1), Scope::Authentication).await,
            Err(RentalError::Storage(_))
        ));
        assert!(matches!(
            engine
                .validate(&"a".repeat(crate::token::TOKEN_PLAINTEXT_LEN), Scope::Authentication)
                .await,
            Err(RentalError::Storage(_))
        ));
    }
}
