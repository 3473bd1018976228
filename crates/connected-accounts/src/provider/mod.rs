//! OAuth Provider Abstraction
//!
//! A provider is plain data ([`ProviderProfile`]); the protocol behaviour
//! lives in one [`Handshake`] implementation per OAuth generation.

pub mod builtin;
pub mod oauth1;
pub mod oauth2;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

use crate::account::IdentityRules;
use crate::common::{
    encode_query, parse_query_pairs, send_checked, AuthError, AuthResult, HttpClient, HttpRequest,
};
use crate::session::SessionStore;
use crate::token::{encode_outgoing, Consumer, ParsedToken, SigningParams, TokenGrant, TokenKeys};

pub use oauth1::OAuth1Handshake;
pub use oauth2::OAuth2Handshake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    OAuth1,
    OAuth2,
}

/// Handshake state machine stages.
///
/// OAuth1 walks `Start → RequestTokenFetched → Redirected → CallbackReceived
/// → AccessTokenFetched`; OAuth2 replaces `RequestTokenFetched` with
/// `StateIssued`. Any transition may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    RequestTokenFetched,
    StateIssued,
    Redirected,
    CallbackReceived,
    AccessTokenFetched,
    Failed,
}

/// How the profile endpoint expects to be authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRequest {
    /// The protocol's normal request encoding (OAuth1 signature or
    /// `access_token` query parameter)
    Signed,
    /// `Authorization: OAuth <access_token>` header and nothing else
    OAuthHeader,
    /// `access_token`, `api_key` (consumer key) and `api_secret` query
    /// parameters
    ApiKeyParams,
}

/// Immutable per-provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub authorization_url: String,
    pub access_token_url: String,
    /// OAuth1 only
    pub request_token_url: Option<String>,
    pub profile_url: String,
    pub consumer: Consumer,
    pub scope: Vec<String>,
    pub scope_separator: String,
    pub auth_params: BTreeMap<String, String>,
    /// Key holding the relative expiry in OAuth2 token payloads
    pub expires_in_key: Option<String>,
    pub profile_request: ProfileRequest,
    pub identity: IdentityRules,
}

impl ProviderProfile {
    /// OAuth2 profile with the common defaults.
    pub fn oauth2(
        id: impl Into<String>,
        name: impl Into<String>,
        authorization_url: impl Into<String>,
        access_token_url: impl Into<String>,
        profile_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            protocol: Protocol::OAuth2,
            authorization_url: authorization_url.into(),
            access_token_url: access_token_url.into(),
            request_token_url: None,
            profile_url: profile_url.into(),
            consumer: Consumer::default(),
            scope: Vec::new(),
            scope_separator: " ".into(),
            auth_params: BTreeMap::new(),
            expires_in_key: Some("expires_in".into()),
            profile_request: ProfileRequest::Signed,
            identity: IdentityRules::default(),
        }
    }

    /// OAuth1 profile. OAuth1 tokens never carry an expiry.
    pub fn oauth1(
        id: impl Into<String>,
        name: impl Into<String>,
        request_token_url: impl Into<String>,
        authorization_url: impl Into<String>,
        access_token_url: impl Into<String>,
        profile_url: impl Into<String>,
    ) -> Self {
        Self {
            protocol: Protocol::OAuth1,
            request_token_url: Some(request_token_url.into()),
            expires_in_key: None,
            ..Self::oauth2(id, name, authorization_url, access_token_url, profile_url)
        }
    }

    pub fn with_consumer(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.consumer = Consumer {
            key: key.into(),
            secret: secret.into(),
        };
        self
    }

    pub fn with_scope<S: Into<String>>(mut self, scope: impl IntoIterator<Item = S>) -> Self {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scope_separator(mut self, separator: impl Into<String>) -> Self {
        self.scope_separator = separator.into();
        self
    }

    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.insert(key.into(), value.into());
        self
    }

    pub fn with_expires_in_key(mut self, key: Option<&str>) -> Self {
        self.expires_in_key = key.map(String::from);
        self
    }

    pub fn with_profile_request(mut self, style: ProfileRequest) -> Self {
        self.profile_request = style;
        self
    }

    pub fn with_identity(mut self, identity: IdentityRules) -> Self {
        self.identity = identity;
        self
    }

    /// A provider can only be offered when both consumer credentials are set.
    pub fn is_enabled(&self) -> bool {
        !self.consumer.key.is_empty() && !self.consumer.secret.is_empty()
    }

    /// Session key under which the handshake keeps its state.
    pub fn session_key(&self) -> String {
        match self.protocol {
            Protocol::OAuth1 => format!("connected-accounts-{}-request-token", self.id),
            Protocol::OAuth2 => format!("connected-accounts-{}-application-state", self.id),
        }
    }

    /// Configured scope followed by caller-supplied extras, as a new vector.
    ///
    /// The profile's own scope list is never modified.
    pub fn scope_for(&self, extra: &[String]) -> Vec<String> {
        let mut scope = self.scope.clone();
        for s in extra {
            if !s.is_empty() && !scope.contains(s) {
                scope.push(s.clone());
            }
        }
        scope
    }

    /// The joined `scope` parameter, or `None` when there is no scope at all.
    pub fn joined_scope(&self, extra: &[String]) -> Option<String> {
        let scope = self.scope_for(extra);
        (!scope.is_empty()).then(|| scope.join(&self.scope_separator))
    }

    pub fn token_keys(&self) -> TokenKeys<'_> {
        match self.protocol {
            Protocol::OAuth1 => TokenKeys::OAUTH1,
            Protocol::OAuth2 => TokenKeys::oauth2(self.expires_in_key.as_deref()),
        }
    }
}

/// The inbound redirect from the provider back to the application.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    /// Absolute callback URL the handshake was started with, without the
    /// provider's query parameters
    pub callback_url: String,
    pub params: Vec<(String, String)>,
}

impl CallbackRequest {
    pub fn new(callback_url: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            callback_url: callback_url.into(),
            params,
        }
    }

    /// Build from the callback URL and the raw query string of the redirect.
    pub fn from_query(callback_url: impl Into<String>, query: &str) -> Self {
        Self::new(callback_url, parse_query_pairs(query))
    }

    /// Build from the full redirect URL (`https://app/cb?code=...&state=...`).
    pub fn from_redirect_url(url: &str) -> Self {
        match url.split_once('?') {
            Some((base, query)) => Self::from_query(base, query),
            None => Self::new(url, Vec::new()),
        }
    }

    /// First value of a query parameter. Empty values count as absent.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// The redirect→callback→token exchange of one OAuth generation.
#[async_trait]
pub trait Handshake: Send + Sync {
    fn profile(&self) -> &ProviderProfile;

    /// Prepare the handshake and return the authorize URL to send the user to.
    ///
    /// `extra_params` are merged over the authorize parameters last, except
    /// for the value the handshake checks at callback time.
    async fn begin(
        &self,
        session: &mut dyn SessionStore,
        callback_url: &str,
        extra_scope: &[String],
        extra_params: &[(String, String)],
    ) -> AuthResult<String>;

    /// Validate the provider's callback and exchange it for an access token.
    async fn complete(
        &self,
        session: &mut dyn SessionStore,
        callback: &CallbackRequest,
    ) -> AuthResult<TokenGrant>;

    /// Exchange a refresh token for a new access token.
    ///
    /// `None` when there is nothing to refresh or the provider refused.
    async fn refresh(&self, _token: &ParsedToken) -> Option<TokenGrant> {
        None
    }

    /// Fetch the user's profile document with a freshly obtained token.
    async fn fetch_profile(&self, token: &ParsedToken) -> AuthResult<Value>;
}

/// Build the handshake matching the profile's protocol.
pub fn handshake_for(profile: Arc<ProviderProfile>, http: Arc<dyn HttpClient>) -> Arc<dyn Handshake> {
    match profile.protocol {
        Protocol::OAuth1 => Arc::new(OAuth1Handshake::new(profile, http)),
        Protocol::OAuth2 => Arc::new(OAuth2Handshake::new(profile, http)),
    }
}

/// Set authorize parameters, replacing existing values in place.
pub(crate) fn merge_params<'a>(
    params: &mut Vec<(String, String)>,
    extra: impl IntoIterator<Item = (&'a String, &'a String)>,
) {
    for (key, value) in extra {
        match params.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value.clone(),
            None => params.push((key.clone(), value.clone())),
        }
    }
}

/// Caller-supplied authorize parameters minus the handshake-owned `reserved` key.
pub(crate) fn caller_params<'a>(
    provider_id: &'a str,
    extra: &'a [(String, String)],
    reserved: &'a str,
) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
    extra.iter().filter_map(move |(k, v)| {
        if k == reserved {
            warn!("Ignoring caller-supplied '{}' for {}", k, provider_id);
            None
        } else {
            Some((k, v))
        }
    })
}

/// Append query parameters to an authorize endpoint.
pub(crate) fn authorize_url(base: &str, params: &[(String, String)]) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, encode_query(params))
}

/// Shared profile fetch for both protocol generations.
pub(crate) async fn fetch_profile_data(
    http: &dyn HttpClient,
    profile: &ProviderProfile,
    token: &ParsedToken,
) -> AuthResult<Value> {
    let access_token = token.primary.as_deref().unwrap_or_default();
    let request = match profile.profile_request {
        ProfileRequest::Signed => encode_outgoing(
            profile.protocol,
            HttpRequest::get(&profile.profile_url),
            Some(token),
            &profile.consumer,
            SigningParams::default(),
        )
        .map_err(AuthError::ProfileFetch)?,
        ProfileRequest::OAuthHeader => HttpRequest::get(&profile.profile_url)
            .header("Authorization", format!("OAuth {}", access_token)),
        ProfileRequest::ApiKeyParams => HttpRequest::get(&profile.profile_url)
            .query("access_token", access_token)
            .query("api_key", &profile.consumer.key)
            .query("api_secret", access_token),
    };

    let body = send_checked(http, request).await.map_err(|e| {
        error!("Unable to fetch user profile for {}: {}", profile.id, e);
        AuthError::ProfileFetch(e)
    })?;

    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) if !map.is_empty() => Ok(Value::Object(map)),
        Ok(_) | Err(_) => {
            warn!("Profile response from {} is not a JSON object", profile.id);
            Err(AuthError::EmptyProfile)
        }
    }
}
