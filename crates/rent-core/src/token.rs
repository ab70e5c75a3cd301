//! # Credential Types
//!
//! Opaque bearer credentials and their durable digests.
//!
//! A credential's plaintext is 16 bytes of OS randomness rendered as 32
//! lowercase hex characters. Only `SHA-256(plaintext)` is ever persisted;
//! the plaintext is handed to the caller once, at issuance.

use crate::error::{RentalError, RentalResult};
use crate::user::SubjectId;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Random bytes per credential (128 bits).
pub const TOKEN_ENTROPY_BYTES: usize = 16;

/// Length of an encoded plaintext credential.
pub const TOKEN_PLAINTEXT_LEN: usize = TOKEN_ENTROPY_BYTES * 2;

/// Purpose a credential was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One-time account activation
    Activation,
    /// Ongoing API access
    Authentication,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activation" => Ok(Scope::Activation),
            "authentication" => Ok(Scope::Authentication),
            other => Err(RentalError::Validation(format!("unknown scope: {}", other))),
        }
    }
}

/// SHA-256 digest of a plaintext credential
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    /// Digest a plaintext credential
    pub fn of(plaintext: &str) -> Self {
        let digest = Sha256::digest(plaintext.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> RentalResult<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| RentalError::Storage(format!("token hash has {} bytes", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Never print full digests in logs.
impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}…)", hex::encode(&self.0[..4]))
    }
}

/// The persisted form of a credential (no plaintext)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: TokenHash,
    pub subject_id: SubjectId,
    pub scope: Scope,
    pub expires_at: DateTime<Utc>,
}

impl TokenRecord {
    /// A record is usable strictly before its expiry
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A freshly issued credential, including the plaintext
#[derive(Clone, Serialize)]
pub struct Credential {
    /// Shown to the caller exactly once
    #[serde(rename = "token")]
    pub plaintext: String,

    #[serde(skip)]
    pub hash: TokenHash,

    #[serde(skip)]
    pub subject_id: SubjectId,

    pub scope: Scope,

    #[serde(rename = "expiry")]
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Generate a new credential for `subject_id`. Does not persist it.
    pub fn generate(subject_id: SubjectId, scope: Scope, expires_at: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = hex::encode(bytes);
        let hash = TokenHash::of(&plaintext);

        Self {
            plaintext,
            hash,
            subject_id,
            scope,
            expires_at,
        }
    }

    /// The record to persist
    pub fn record(&self) -> TokenRecord {
        TokenRecord {
            hash: self.hash,
            subject_id: self.subject_id,
            scope: self.scope,
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("plaintext", &"[redacted]")
            .field("subject_id", &self.subject_id)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Cheap shape check before hashing. Not a security boundary.
pub fn validate_plaintext(plaintext: &str) -> RentalResult<()> {
    if plaintext.is_empty() {
        return Err(RentalError::Validation("token must be provided".to_string()));
    }
    if plaintext.len() != TOKEN_PLAINTEXT_LEN {
        return Err(RentalError::Validation(format!(
            "token must be {} characters long",
            TOKEN_PLAINTEXT_LEN
        )));
    }
    Ok(())
}
