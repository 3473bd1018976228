//! Token Codec
//!
//! Normalizes whatever a provider returned from a token endpoint into a
//! [`ParsedToken`]. OAuth2 providers mostly answer with JSON, a few (and every
//! OAuth1 provider) with a form-encoded query string; both are accepted.

pub mod signing;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::common::{parse_query_pairs, scalar_string};

pub use signing::{encode_outgoing, Consumer, SigningParams};

/// Normalized token triple.
///
/// OAuth1: `oauth_token` / `oauth_token_secret`, never expires.
/// OAuth2: `access_token` / `refresh_token`, optional absolute expiry.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedToken {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// Custom Debug implementation that redacts secrets
impl fmt::Debug for ParsedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedToken")
            .field("primary", &self.primary.as_ref().map(|_| "[REDACTED]"))
            .field("secondary", &self.secondary.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl ParsedToken {
    /// True iff an expiry is present and `now` has reached it.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if now >= expiry)
    }

    /// True when the token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry - now < margin)
    }
}

/// Field names used to pull a [`ParsedToken`] out of a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenKeys<'a> {
    pub primary: &'a str,
    pub secondary: &'a str,
    /// Relative expiry in seconds. `None` for providers that never send one.
    pub expires_in: Option<&'a str>,
}

impl<'a> TokenKeys<'a> {
    pub const OAUTH1: TokenKeys<'static> = TokenKeys {
        primary: "oauth_token",
        secondary: "oauth_token_secret",
        expires_in: None,
    };

    pub fn oauth2(expires_in: Option<&'a str>) -> Self {
        Self {
            primary: "access_token",
            secondary: "refresh_token",
            expires_in,
        }
    }
}

/// A raw token payload together with its parsed form.
///
/// The raw text is kept verbatim; re-parsing it later recomputes relative
/// expiries against a new clock, so callers store `token` as parsed here.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub raw: String,
    pub token: ParsedToken,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("raw", &"[REDACTED]")
            .field("token", &self.token)
            .finish()
    }
}

/// Parse a raw token payload against the current clock.
pub fn parse(raw: &str, keys: TokenKeys<'_>) -> ParsedToken {
    parse_at(raw, keys, Utc::now())
}

/// Parse a raw token payload, resolving relative expiry against `now`.
///
/// JSON objects are tried first, then form-encoded query strings. Missing
/// fields come back as `None`; this never fails.
pub fn parse_at(raw: &str, keys: TokenKeys<'_>, now: DateTime<Utc>) -> ParsedToken {
    let fields = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => RawFields::Json(map),
        _ => RawFields::Query(parse_query_pairs(raw.trim())),
    };

    let expires_at = keys
        .expires_in
        .filter(|k| !k.is_empty())
        .and_then(|k| fields.get(k))
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| expiry_from(now, secs));

    ParsedToken {
        primary: fields.get(keys.primary),
        secondary: fields.get(keys.secondary),
        expires_at,
    }
}

/// Absolute expiry for a relative lifetime. Zero, non-finite and
/// out-of-range lifetimes count as no expiry.
fn expiry_from(now: DateTime<Utc>, secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let secs = secs as i64;
    if secs == 0 {
        return None;
    }
    Duration::try_seconds(secs).and_then(|lifetime| now.checked_add_signed(lifetime))
}

enum RawFields {
    Json(serde_json::Map<String, Value>),
    Query(Vec<(String, String)>),
}

impl RawFields {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            RawFields::Json(map) => map.get(key).and_then(scalar_string),
            RawFields::Query(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty()),
        }
    }
}
