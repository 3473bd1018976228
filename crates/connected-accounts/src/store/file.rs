//! Encrypted File Store
//!
//! One AES-256-GCM encrypted JSON file per account under
//! `<base>/providers/<provider>/`. A metadata index (`metadata.json`,
//! unencrypted) maps provider:uid → file paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::crypto::{self, KEY_SIZE};
use super::{AccountInfo, AccountStore, StoreError};
use crate::account::{AccountRecord, AccountUpdate};
use crate::token::ParsedToken;

/// File extension for encrypted account files
const ENC_EXT: &str = "json.enc";
const METADATA_FILE: &str = "metadata.json";

/// Metadata index (unencrypted, contains no secrets)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    version: u32,
    accounts: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataEntry {
    provider: String,
    uid: String,
    added: DateTime<Utc>,
    last_login: DateTime<Utc>,
    file: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: 1,
            accounts: Vec::new(),
        }
    }
}

impl Metadata {
    fn find(&self, provider: &str, uid: &str) -> Option<&MetadataEntry> {
        self.accounts.iter().find(|e| e.provider == provider && e.uid == uid)
    }
}

pub struct EncryptedFileStore {
    base_dir: PathBuf,
    master_key: [u8; KEY_SIZE],
    /// In-memory metadata cache; the lock also serializes file writes
    metadata: RwLock<Metadata>,
}

impl EncryptedFileStore {
    /// Open (or initialise) a store rooted at `base_dir`, keyed by `secret`.
    ///
    /// Runs once at startup with blocking I/O; account reads and writes
    /// after that go through `tokio::fs`.
    pub fn open(base_dir: impl Into<PathBuf>, secret: &str) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(base_dir.join("providers"))
            .map_err(|e| StoreError::Io(format!("failed to create store dir: {}", e)))?;

        let master_key = crypto::derive_master_key(secret)?;

        let metadata_path = base_dir.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            let data = std::fs::read_to_string(&metadata_path)
                .map_err(|e| StoreError::Io(format!("failed to read metadata: {}", e)))?;
            serde_json::from_str(&data)
                .map_err(|e| StoreError::Serialization(format!("failed to parse metadata: {}", e)))?
        } else {
            let m = Metadata::default();
            std::fs::write(&metadata_path, metadata_json(&m)?)
                .map_err(|e| StoreError::Io(format!("failed to write metadata: {}", e)))?;
            m
        };

        info!(
            "Account store initialized at {:?} ({} accounts)",
            base_dir,
            metadata.accounts.len()
        );

        Ok(Self {
            base_dir,
            master_key,
            metadata: RwLock::new(metadata),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn read_record(&self, entry: &MetadataEntry) -> Result<Option<AccountRecord>, StoreError> {
        let file_path = self.base_dir.join(&entry.file);
        let encrypted = match fs::read(&file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Metadata references {:?} but file does not exist", file_path);
                return Ok(None);
            }
            Err(e) => return Err(StoreError::Io(format!("failed to read account file: {}", e))),
        };
        let decrypted = crypto::decrypt(&self.master_key, &encrypted)?;

        serde_json::from_slice(&decrypted)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("failed to parse account JSON: {}", e)))
    }

    async fn write_record(&self, record: &AccountRecord) -> Result<String, StoreError> {
        let file_rel = account_file_path(&record.provider_id, &record.uid);
        let file_abs = self.base_dir.join(&file_rel);

        if let Some(parent) = file_abs.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(format!("failed to create provider dir: {}", e)))?;
        }

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialization(format!("failed to serialize account: {}", e)))?;
        let encrypted = crypto::encrypt(&self.master_key, &json)?;
        fs::write(&file_abs, &encrypted)
            .await
            .map_err(|e| StoreError::Io(format!("failed to write account file: {}", e)))?;

        Ok(file_rel)
    }

    fn not_found(provider_id: &str, uid: &str) -> StoreError {
        StoreError::NotFound {
            provider: provider_id.to_string(),
            uid: uid.to_string(),
        }
    }
}

#[async_trait]
impl AccountStore for EncryptedFileStore {
    async fn upsert_account(
        &self,
        provider_id: &str,
        uid: &str,
        update: AccountUpdate,
    ) -> Result<(AccountRecord, bool), StoreError> {
        let now = Utc::now();
        let mut metadata = self.metadata.write().await;

        let existing = match metadata.find(provider_id, uid) {
            Some(entry) => self.read_record(entry).await?,
            None => None,
        };
        let created = existing.is_none();
        let record = match existing {
            Some(mut record) => {
                record.apply(update, now);
                record
            }
            None => AccountRecord::new(provider_id, uid, update, now),
        };

        let file = self.write_record(&record).await?;
        metadata.accounts.retain(|e| !(e.provider == provider_id && e.uid == uid));
        metadata.accounts.push(MetadataEntry {
            provider: provider_id.to_string(),
            uid: uid.to_string(),
            added: record.date_added,
            last_login: record.last_login,
            file,
        });
        write_metadata(&self.base_dir, &metadata).await?;

        if created {
            info!("Stored new account {}:{}", provider_id, uid);
        }
        Ok((record, created))
    }

    async fn get_account(&self, provider_id: &str, uid: &str) -> Result<Option<AccountRecord>, StoreError> {
        let metadata = self.metadata.read().await;
        match metadata.find(provider_id, uid) {
            Some(entry) => self.read_record(entry).await,
            None => Ok(None),
        }
    }

    async fn list_accounts(&self, provider_filter: Option<&str>) -> Result<Vec<AccountInfo>, StoreError> {
        let metadata = self.metadata.read().await;
        Ok(metadata
            .accounts
            .iter()
            .filter(|e| provider_filter.map_or(true, |p| e.provider == p))
            .map(|e| AccountInfo {
                provider_id: e.provider.clone(),
                uid: e.uid.clone(),
                date_added: e.added,
                last_login: e.last_login,
            })
            .collect())
    }

    async fn update_token(
        &self,
        provider_id: &str,
        uid: &str,
        raw_token: String,
        token: ParsedToken,
    ) -> Result<AccountRecord, StoreError> {
        let metadata = self.metadata.write().await;
        let entry = metadata
            .find(provider_id, uid)
            .ok_or_else(|| Self::not_found(provider_id, uid))?;
        let mut record = self
            .read_record(entry)
            .await?
            .ok_or_else(|| Self::not_found(provider_id, uid))?;

        record.raw_token = raw_token;
        record.token = token;
        self.write_record(&record).await?;
        Ok(record)
    }

    async fn delete_account(&self, provider_id: &str, uid: &str) -> Result<bool, StoreError> {
        let mut metadata = self.metadata.write().await;
        let Some(idx) = metadata
            .accounts
            .iter()
            .position(|e| e.provider == provider_id && e.uid == uid)
        else {
            return Ok(false);
        };

        let entry = metadata.accounts.remove(idx);
        let file_path = self.base_dir.join(&entry.file);
        match fs::remove_file(&file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(format!("failed to delete account file: {}", e))),
        }
        write_metadata(&self.base_dir, &metadata).await?;

        info!("Removed account {}:{}", provider_id, uid);
        Ok(true)
    }
}

fn metadata_json(metadata: &Metadata) -> Result<String, StoreError> {
    serde_json::to_string_pretty(metadata)
        .map_err(|e| StoreError::Serialization(format!("failed to serialize metadata: {}", e)))
}

async fn write_metadata(base_dir: &Path, metadata: &Metadata) -> Result<(), StoreError> {
    fs::write(base_dir.join(METADATA_FILE), metadata_json(metadata)?)
        .await
        .map_err(|e| StoreError::Io(format!("failed to write metadata: {}", e)))
}

/// Relative file path for an account.
/// SHA-256 of `provider:uid` gives a non-identifying filename.
fn account_file_path(provider: &str, uid: &str) -> String {
    let hash = Sha256::digest(format!("{}:{}", provider, uid).as_bytes());
    format!("providers/{}/{}.{}", provider, hex::encode(&hash[..8]), ENC_EXT)
}
