//! OAuth 2.0 Handshake
//!
//! Authorization Code flow with an application `state` nonce round-tripped
//! through the authorize redirect, plus refresh-token exchange.

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde_json::Value;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use super::{
    authorize_url, caller_params, fetch_profile_data, merge_params, CallbackRequest, Handshake,
    ProviderProfile, Stage,
};
use crate::common::{send_checked, AuthError, AuthResult, HttpClient, HttpRequest, TransportError};
use crate::session::SessionStore;
use crate::token::{self, ParsedToken, TokenGrant};

/// Length of the anti-forgery nonce
pub const STATE_LENGTH: usize = 32;

pub struct OAuth2Handshake {
    profile: Arc<ProviderProfile>,
    http: Arc<dyn HttpClient>,
}

impl OAuth2Handshake {
    pub fn new(profile: Arc<ProviderProfile>, http: Arc<dyn HttpClient>) -> Self {
        Self { profile, http }
    }

    /// Compare the stored nonce with the one the provider echoed back.
    fn check_application_state(&self, stored: Option<&str>, returned: Option<&str>) -> bool {
        match (stored, returned) {
            (Some(stored), Some(returned)) => stored.as_bytes().ct_eq(returned.as_bytes()).into(),
            (Some(_), None) => {
                error!("No state parameter returned by {}", self.profile.id);
                false
            }
            (None, _) => {
                error!("No state stored in the session for {}", self.profile.id);
                false
            }
        }
    }

    /// POST a token-endpoint request and parse the answer.
    async fn token_request(&self, request: HttpRequest) -> Result<TokenGrant, TransportError> {
        let raw = send_checked(self.http.as_ref(), request).await?;
        let token = token::parse(&raw, self.profile.token_keys());

        if token.primary.is_none() {
            return Err(TransportError::Payload(token_error_description(&raw)));
        }
        Ok(TokenGrant { raw, token })
    }

    fn client_form(&self, request: HttpRequest) -> HttpRequest {
        request
            .form("client_id", &self.profile.consumer.key)
            .form("client_secret", &self.profile.consumer.secret)
    }
}

#[async_trait]
impl Handshake for OAuth2Handshake {
    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    async fn begin(
        &self,
        session: &mut dyn SessionStore,
        callback_url: &str,
        extra_scope: &[String],
        extra_params: &[(String, String)],
    ) -> AuthResult<String> {
        let id = &self.profile.id;
        debug!(provider = %id, stage = ?Stage::Start, "starting OAuth2 handshake");

        let mut params = vec![
            ("client_id".to_string(), self.profile.consumer.key.clone()),
            ("redirect_uri".to_string(), callback_url.to_string()),
            ("response_type".to_string(), "code".to_string()),
        ];
        if let Some(scope) = self.profile.joined_scope(extra_scope) {
            params.push(("scope".to_string(), scope));
        }

        let state = generate_state();
        params.push(("state".to_string(), state.clone()));
        session.set(&self.profile.session_key(), state);
        debug!(provider = %id, stage = ?Stage::StateIssued);

        merge_params(&mut params, &self.profile.auth_params);
        merge_params(&mut params, caller_params(id, extra_params, "state"));

        debug!(provider = %id, stage = ?Stage::Redirected);
        Ok(authorize_url(&self.profile.authorization_url, &params))
    }

    async fn complete(
        &self,
        session: &mut dyn SessionStore,
        callback: &CallbackRequest,
    ) -> AuthResult<TokenGrant> {
        let id = &self.profile.id;
        debug!(provider = %id, stage = ?Stage::CallbackReceived);

        // The nonce is single-use whatever happens next
        let stored = session.take(&self.profile.session_key());
        if !self.check_application_state(stored.as_deref(), callback.param("state")) {
            error!("Application state check failed for {}", id);
            return Err(AuthError::StateMismatch);
        }

        let Some(code) = callback.param("code") else {
            match callback.param("error") {
                Some(reason) => warn!(
                    "{} denied authorization: {} {}",
                    id,
                    reason,
                    callback.param("error_description").unwrap_or_default()
                ),
                None => warn!("No code returned by {}", id),
            }
            return Err(AuthError::MissingCode);
        };

        info!("Exchanging authorization code for tokens with {}", id);
        let request = self
            .client_form(HttpRequest::post(&self.profile.access_token_url))
            .form("code", code)
            .form("redirect_uri", &callback.callback_url)
            .form("grant_type", "authorization_code");

        let grant = self.token_request(request).await.map_err(|e| {
            error!("Unable to fetch access token for {}: {}", id, e);
            AuthError::AccessToken(e)
        })?;

        info!(provider = %id, stage = ?Stage::AccessTokenFetched, "OAuth2 handshake complete");
        Ok(grant)
    }

    async fn refresh(&self, token: &ParsedToken) -> Option<TokenGrant> {
        let id = &self.profile.id;
        let Some(refresh_token) = token.secondary.as_deref() else {
            debug!("No refresh token for {}, nothing to refresh", id);
            return None;
        };

        info!("Refreshing access token with {}", id);
        let request = self
            .client_form(HttpRequest::post(&self.profile.access_token_url))
            .form("grant_type", "refresh_token")
            .form("refresh_token", refresh_token);

        match self.token_request(request).await {
            Ok(grant) => Some(grant),
            Err(e) => {
                error!("Unable to refresh access token for {}: {}", id, e);
                None
            }
        }
    }

    async fn fetch_profile(&self, token: &ParsedToken) -> AuthResult<Value> {
        fetch_profile_data(self.http.as_ref(), &self.profile, token).await
    }
}

/// Generate a random application state for CSRF protection.
pub fn generate_state() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

/// Best-effort description of a token endpoint answer without an access token.
fn token_error_description(raw: &str) -> String {
    let parsed: Value = serde_json::from_str(raw).unwrap_or(Value::Null);
    match parsed.get("error").and_then(|v| v.as_str()) {
        Some(err) => {
            let desc = parsed
                .get("error_description")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            format!("{}: {}", err, desc)
        }
        None => "missing access_token in response".to_string(),
    }
}
