//! Account Resolution
//!
//! Turns a provider's profile document into a stable uid and a normalized
//! field set. Each provider describes where things live with data-only
//! [`IdentityRules`].

pub mod record;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{interpolate, scalar_string, AuthError, AuthResult};
use crate::token::ParsedToken;

pub use record::{AccountRecord, AccountUpdate};

/// How to derive one normalized value from the profile document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// A top-level field of the (unwrapped) profile document
    Field(String),
    /// `{field}` placeholders filled from the document; `{uid}` is always
    /// available. Absent if any placeholder is.
    Template(String),
    /// A field with every occurrence of `from` replaced by `to`
    Replace { field: String, from: String, to: String },
}

impl FieldRule {
    pub fn field(name: &str) -> Self {
        FieldRule::Field(name.to_string())
    }

    pub fn template(template: &str) -> Self {
        FieldRule::Template(template.to_string())
    }

    pub fn replace(field: &str, from: &str, to: &str) -> Self {
        FieldRule::Replace {
            field: field.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn apply(&self, data: &Value) -> Option<String> {
        match self {
            FieldRule::Field(name) => data.get(name).and_then(scalar_string),
            FieldRule::Template(template) => interpolate(template, data),
            FieldRule::Replace { field, from, to } => data
                .get(field)
                .and_then(scalar_string)
                .map(|v| v.replace(from.as_str(), to)),
        }
    }
}

/// Per-provider extraction rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRules {
    /// Key wrapping the interesting part of the profile (`data`, `response`)
    pub envelope: Option<String>,
    /// Field holding the uid, inside the envelope when there is one
    pub uid_field: String,
    pub name: Option<FieldRule>,
    pub email: Option<FieldRule>,
    pub username: Option<FieldRule>,
    pub avatar_url: Option<FieldRule>,
    pub profile_url: Option<FieldRule>,
    /// Human label for the account
    pub display_name: Option<FieldRule>,
    /// API token suffix read from the stored profile (MailChimp's data center)
    pub token_suffix: Option<TokenSuffix>,
}

impl Default for IdentityRules {
    fn default() -> Self {
        Self {
            envelope: None,
            uid_field: "id".to_string(),
            name: Some(FieldRule::field("name")),
            email: Some(FieldRule::field("email")),
            username: None,
            avatar_url: None,
            profile_url: None,
            display_name: Some(FieldRule::field("name")),
            token_suffix: None,
        }
    }
}

/// `"{token}-{value of field}"`, falling back to `default` when the field is
/// missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSuffix {
    pub field: String,
    pub default: String,
}

/// Provider-agnostic profile fields. Anything the provider did not send is
/// `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
}

/// Applies a provider's [`IdentityRules`] to profile documents.
#[derive(Debug, Clone, Copy)]
pub struct AccountResolver<'a> {
    rules: &'a IdentityRules,
}

impl<'a> AccountResolver<'a> {
    pub fn new(rules: &'a IdentityRules) -> Self {
        Self { rules }
    }

    /// Stable, stringified external identity.
    pub fn extract_uid(&self, profile_data: &Value) -> AuthResult<String> {
        self.extract_extra_data(profile_data)
            .get(&self.rules.uid_field)
            .and_then(scalar_string)
            .ok_or(AuthError::UnresolvableIdentity)
    }

    /// The part of the profile document kept on the account record.
    pub fn extract_extra_data(&self, profile_data: &Value) -> Value {
        match &self.rules.envelope {
            Some(envelope) => profile_data
                .get(envelope)
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default())),
            None => profile_data.clone(),
        }
    }

    /// Normalized fields from a raw profile document. Never fails.
    pub fn extract_fields(&self, profile_data: &Value) -> AccountFields {
        let uid = self.extract_uid(profile_data).ok();
        self.fields_from_extra(&self.extract_extra_data(profile_data), uid.as_deref())
    }

    /// Normalized fields from already-unwrapped extra data.
    pub fn fields_from_extra(&self, extra: &Value, uid: Option<&str>) -> AccountFields {
        let data = with_uid(extra, uid);
        let apply = |rule: &Option<FieldRule>| rule.as_ref().and_then(|r| r.apply(&data));

        AccountFields {
            name: apply(&self.rules.name),
            email: apply(&self.rules.email),
            username: apply(&self.rules.username),
            avatar_url: apply(&self.rules.avatar_url),
            profile_url: apply(&self.rules.profile_url),
        }
    }

    pub fn display_name(&self, extra: &Value, uid: Option<&str>) -> Option<String> {
        let data = with_uid(extra, uid);
        self.rules.display_name.as_ref().and_then(|r| r.apply(&data))
    }

    /// The token an API client should present, with any provider suffix.
    pub fn api_token(&self, access_token: &str, extra: &Value) -> String {
        match &self.rules.token_suffix {
            Some(suffix) => {
                let value = extra
                    .get(&suffix.field)
                    .and_then(scalar_string)
                    .unwrap_or_else(|| suffix.default.clone());
                format!("{}-{}", access_token, value)
            }
            None => access_token.to_string(),
        }
    }

    /// True iff the token has an expiry and `now` has reached it.
    pub fn is_expired(token: &ParsedToken, now: DateTime<Utc>) -> bool {
        token.is_expired(now)
    }
}

fn with_uid(extra: &Value, uid: Option<&str>) -> Value {
    let mut data = match extra {
        Value::Object(map) => Value::Object(map.clone()),
        _ => Value::Object(Default::default()),
    };
    if let (Some(uid), Value::Object(map)) = (uid, &mut data) {
        map.insert("uid".to_string(), Value::String(uid.to_string()));
    }
    data
}
