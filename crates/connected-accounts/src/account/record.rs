//! Stored account record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use super::{AccountFields, AccountResolver};
use crate::provider::ProviderProfile;
use crate::token::ParsedToken;

/// One linked third-party account. `(provider_id, uid)` is the natural key.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub provider_id: String,
    pub uid: String,
    /// Token payload exactly as the provider returned it
    pub raw_token: String,
    pub token: ParsedToken,
    #[serde(default)]
    pub fields: AccountFields,
    #[serde(default)]
    pub extra_data: Value,
    pub date_added: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

// Custom Debug implementation that redacts secrets
impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("provider_id", &self.provider_id)
            .field("uid", &self.uid)
            .field("raw_token", &"[REDACTED]")
            .field("token", &self.token)
            .field("fields", &self.fields)
            .field("date_added", &self.date_added)
            .field("last_login", &self.last_login)
            .finish()
    }
}

/// Everything a successful handshake writes onto the record.
#[derive(Clone, PartialEq)]
pub struct AccountUpdate {
    pub raw_token: String,
    pub token: ParsedToken,
    pub fields: AccountFields,
    pub extra_data: Value,
}

impl fmt::Debug for AccountUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountUpdate")
            .field("raw_token", &"[REDACTED]")
            .field("token", &self.token)
            .field("fields", &self.fields)
            .finish()
    }
}

impl AccountRecord {
    /// A fresh record created at `now`.
    pub fn new(provider_id: &str, uid: &str, update: AccountUpdate, now: DateTime<Utc>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            uid: uid.to_string(),
            raw_token: update.raw_token,
            token: update.token,
            fields: update.fields,
            extra_data: update.extra_data,
            date_added: now,
            last_login: now,
        }
    }

    /// Overwrite the handshake-owned fields; `date_added` is kept.
    pub fn apply(&mut self, update: AccountUpdate, now: DateTime<Utc>) {
        self.raw_token = update.raw_token;
        self.token = update.token;
        self.fields = update.fields;
        self.extra_data = update.extra_data;
        self.last_login = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        AccountResolver::is_expired(&self.token, now)
    }

    /// Human label, falling back to the provider's display name.
    pub fn display_name(&self, profile: &ProviderProfile) -> String {
        AccountResolver::new(&profile.identity)
            .display_name(&self.extra_data, Some(&self.uid))
            .unwrap_or_else(|| profile.name.clone())
    }

    /// The token an API client should present for this account.
    pub fn api_token(&self, profile: &ProviderProfile) -> Option<String> {
        let access_token = self.token.primary.as_deref()?;
        Some(AccountResolver::new(&profile.identity).api_token(access_token, &self.extra_data))
    }

    /// Summary document for listings and API clients.
    pub fn common_data(&self, profile: &ProviderProfile) -> Value {
        json!({
            "provider": profile.name,
            "provider_id": self.provider_id,
            "uid": self.uid,
            "display_name": self.display_name(profile),
            "token": self.api_token(profile),
            "secondary": self.token.secondary,
            "expires_at": self.token.expires_at,
            "name": self.fields.name,
            "email": self.fields.email,
            "username": self.fields.username,
            "profile_url": self.fields.profile_url,
            "avatar_url": self.fields.avatar_url,
            "date_added": self.date_added,
            "last_login": self.last_login,
        })
    }
}
