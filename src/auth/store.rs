//! User store abstraction
//!
//! The authentication core only reads credential records, except for the
//! hash rewrite after a successful legacy verification.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Stored credential for one account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRecord {
    /// Lookup key and token subject (account id or normalized email)
    pub identifier: String,
    /// Self-describing hash string (Argon2id PHC or legacy `salt$hex`)
    pub password_hash: String,
    pub active: bool,
    pub is_admin: bool,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("identifier", &self.identifier)
            .field("password_hash", &"[redacted]")
            .field("active", &self.active)
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_credential(&self, identifier: &str)
        -> Result<Option<CredentialRecord>, StoreError>;

    async fn update_credential_hash(
        &self,
        identifier: &str,
        new_hash: &str,
    ) -> Result<(), StoreError>;

    async fn is_active(&self, identifier: &str) -> Result<bool, StoreError>;
}

/// DashMap-backed store for tests and single-node setups
#[derive(Default)]
pub struct InMemoryUserStore {
    records: DashMap<String, CredentialRecord>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CredentialRecord) {
        self.records.insert(record.identifier.clone(), record);
    }

    pub fn get(&self, identifier: &str) -> Option<CredentialRecord> {
        self.records.get(identifier).map(|r| r.clone())
    }

    pub fn set_active(&self, identifier: &str, active: bool) -> bool {
        match self.records.get_mut(identifier) {
            Some(mut record) => {
                record.active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_credential(
        &self,
        identifier: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.get(identifier))
    }

    async fn update_credential_hash(
        &self,
        identifier: &str,
        new_hash: &str,
    ) -> Result<(), StoreError> {
        let mut record = self
            .records
            .get_mut(identifier)
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))?;
        record.password_hash = new_hash.to_string();
        Ok(())
    }

    async fn is_active(&self, identifier: &str) -> Result<bool, StoreError> {
        self.records
            .get(identifier)
            .map(|r| r.active)
            .ok_or_else(|| StoreError::NotFound(identifier.to_string()))
    }
}
