//! # Principal Types
//!
//! Users who hold credentials and accrue a spendable token balance.

use crate::error::{RentalError, RentalResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use serde::Serialize;

/// Identifier of the principal a credential authenticates
pub type SubjectId = i64;

/// A registered user
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: SubjectId,
    pub username: String,
    pub email: String,

    /// Argon2id PHC string
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub activated: bool,

    /// Spendable entitlement units. Only the ledger's capture unit raises it.
    pub token_balance: i64,

    pub created_at: DateTime<Utc>,
}

impl User {
    /// Check a candidate password against the stored hash
    pub fn verify_password(&self, candidate: &str) -> bool {
        verify_password(candidate, &self.password_hash)
    }
}

/// Input for creating a user. Balance always starts at zero.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl NewUser {
    /// Validate registration input and hash the password
    pub fn register(username: &str, email: &str, password: &str) -> RentalResult<Self> {
        let username = username.trim();
        let email = email.trim();

        if username.len() < 3 || username.len() > 50 {
            return Err(RentalError::Validation(
                "username must be between 3 and 50 characters".to_string(),
            ));
        }
        if !email.contains('@') || email.len() > 254 {
            return Err(RentalError::Validation(
                "email must be a valid address".to_string(),
            ));
        }
        if password.len() < 8 || password.len() > 72 {
            return Err(RentalError::Validation(
                "password must be between 8 and 72 bytes".to_string(),
            ));
        }

        Ok(Self {
            username: username.to_string(),
            email: email.to_lowercase(),
            password_hash: hash_password(password)?,
        })
    }
}

/// Hash a password with Argon2id and a random salt
pub fn hash_password(password: &str) -> RentalResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RentalError::Internal(format!("password hashing failed: {}", e)))
}

/// Verify a password against a PHC string. Malformed hashes never verify.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
