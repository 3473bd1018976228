//! Account Storage
//!
//! The storage collaborator the broker writes linked accounts into.
//! `(provider_id, uid)` is the natural key and writes are upserts.

pub mod crypto;
pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::account::{AccountRecord, AccountUpdate};
use crate::token::ParsedToken;

pub use file::EncryptedFileStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no account stored for {provider}:{uid}")]
    NotFound { provider: String, uid: String },

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("stored data could not be (de)serialized: {0}")]
    Serialization(String),

    #[error("encryption failure: {0}")]
    Crypto(String),
}

/// Account listing entry. Carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub provider_id: String,
    pub uid: String,
    pub date_added: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl From<&AccountRecord> for AccountInfo {
    fn from(r: &AccountRecord) -> Self {
        Self {
            provider_id: r.provider_id.clone(),
            uid: r.uid.clone(),
            date_added: r.date_added,
            last_login: r.last_login,
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create the record or overwrite the handshake-owned fields of an
    /// existing one. Returns the stored record and whether it was created.
    async fn upsert_account(
        &self,
        provider_id: &str,
        uid: &str,
        update: AccountUpdate,
    ) -> Result<(AccountRecord, bool), StoreError>;

    async fn get_account(&self, provider_id: &str, uid: &str) -> Result<Option<AccountRecord>, StoreError>;

    async fn list_accounts(&self, provider_filter: Option<&str>) -> Result<Vec<AccountInfo>, StoreError>;

    /// Replace the token of an existing account (after a refresh).
    async fn update_token(
        &self,
        provider_id: &str,
        uid: &str,
        raw_token: String,
        token: ParsedToken,
    ) -> Result<AccountRecord, StoreError>;

    /// Returns false when there was nothing to delete.
    async fn delete_account(&self, provider_id: &str, uid: &str) -> Result<bool, StoreError>;
}

type AccountKey = (String, String);

fn key(provider_id: &str, uid: &str) -> AccountKey {
    (provider_id.to_string(), uid.to_string())
}

/// Process-local store, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountKey, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn upsert_account(
        &self,
        provider_id: &str,
        uid: &str,
        update: AccountUpdate,
    ) -> Result<(AccountRecord, bool), StoreError> {
        let now = Utc::now();
        let mut accounts = self.accounts.write().await;

        if let Some(record) = accounts.get_mut(&key(provider_id, uid)) {
            record.apply(update, now);
            return Ok((record.clone(), false));
        }

        let record = AccountRecord::new(provider_id, uid, update, now);
        accounts.insert(key(provider_id, uid), record.clone());
        info!("Stored new account {}:{}", provider_id, uid);
        Ok((record, true))
    }

    async fn get_account(&self, provider_id: &str, uid: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.accounts.read().await.get(&key(provider_id, uid)).cloned())
    }

    async fn list_accounts(&self, provider_filter: Option<&str>) -> Result<Vec<AccountInfo>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .filter(|r| provider_filter.map_or(true, |p| r.provider_id == p))
            .map(AccountInfo::from)
            .collect())
    }

    async fn update_token(
        &self,
        provider_id: &str,
        uid: &str,
        raw_token: String,
        token: ParsedToken,
    ) -> Result<AccountRecord, StoreError> {
        let mut accounts = self.accounts.write().await;
        let record = accounts
            .get_mut(&key(provider_id, uid))
            .ok_or_else(|| StoreError::NotFound {
                provider: provider_id.to_string(),
                uid: uid.to_string(),
            })?;
        record.raw_token = raw_token;
        record.token = token;
        Ok(record.clone())
    }

    async fn delete_account(&self, provider_id: &str, uid: &str) -> Result<bool, StoreError> {
        Ok(self.accounts.write().await.remove(&key(provider_id, uid)).is_some())
    }
}
