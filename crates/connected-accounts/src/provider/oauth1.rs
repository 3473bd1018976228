//! OAuth 1.0a Handshake
//!
//! Request token → user authorization → verifier exchange. Every call to the
//! provider is signed with the consumer secret and, once one exists, the
//! token secret.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    authorize_url, caller_params, fetch_profile_data, merge_params, CallbackRequest, Handshake,
    ProviderProfile, Protocol, Stage,
};
use crate::common::{send_checked, AuthError, AuthResult, HttpClient, HttpRequest, TransportError};
use crate::session::SessionStore;
use crate::token::{self, encode_outgoing, ParsedToken, SigningParams, TokenGrant, TokenKeys};

pub struct OAuth1Handshake {
    profile: Arc<ProviderProfile>,
    http: Arc<dyn HttpClient>,
}

impl OAuth1Handshake {
    pub fn new(profile: Arc<ProviderProfile>, http: Arc<dyn HttpClient>) -> Self {
        Self { profile, http }
    }

    /// Signed POST to the request-token endpoint (consumer credentials only).
    async fn fetch_request_token(&self, callback_url: &str) -> Result<String, TransportError> {
        let url = self
            .profile
            .request_token_url
            .as_deref()
            .ok_or_else(|| TransportError::Request("no request token endpoint configured".into()))?;

        let request = encode_outgoing(
            Protocol::OAuth1,
            HttpRequest::post(url),
            None,
            &self.profile.consumer,
            SigningParams {
                callback: Some(callback_url),
                verifier: None,
            },
        )?;

        send_checked(self.http.as_ref(), request).await
    }
}

#[async_trait]
impl Handshake for OAuth1Handshake {
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
        debug!(provider = %id, stage = ?Stage::Start, "starting OAuth1 handshake");

        let raw = self.fetch_request_token(callback_url).await.map_err(|e| {
            error!("Unable to fetch request token for {}: {}", id, e);
            AuthError::RequestToken(e)
        })?;

        let request_token = token::parse(&raw, TokenKeys::OAUTH1);
        let (Some(oauth_token), Some(_)) = (request_token.primary.as_deref(), request_token.secondary.as_deref()) else {
            error!("Request token response from {} lacks oauth_token/oauth_token_secret", id);
            return Err(AuthError::RequestToken(TransportError::Payload(
                "missing oauth_token or oauth_token_secret".into(),
            )));
        };
        debug!(provider = %id, stage = ?Stage::RequestTokenFetched);

        let mut params = vec![
            ("oauth_token".to_string(), oauth_token.to_string()),
            ("oauth_callback".to_string(), callback_url.to_string()),
        ];
        if let Some(scope) = self.profile.joined_scope(extra_scope) {
            params.push(("scope".to_string(), scope));
        }
        merge_params(&mut params, caller_params(id, extra_params, "oauth_token"));

        session.set(&self.profile.session_key(), raw);
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

        // The stored request token is single-use whatever happens next
        let Some(stored) = session.take(&self.profile.session_key()) else {
            warn!("No request token stored in the session for {}", id);
            return Err(AuthError::MissingSessionState(id.clone()));
        };
        let Some(verifier) = callback.param("oauth_verifier") else {
            warn!("No oauth_verifier returned by {}", id);
            return Err(AuthError::MissingVerifier);
        };

        let request_token = token::parse(&stored, TokenKeys::OAUTH1);
        let request = encode_outgoing(
            Protocol::OAuth1,
            HttpRequest::post(&self.profile.access_token_url),
            Some(&request_token),
            &self.profile.consumer,
            SigningParams {
                callback: Some(&callback.callback_url),
                verifier: Some(verifier),
            },
        )
        .map_err(AuthError::AccessToken)?;

        let raw = send_checked(self.http.as_ref(), request).await.map_err(|e| {
            error!("Unable to fetch access token for {}: {}", id, e);
            AuthError::AccessToken(e)
        })?;

        let token = token::parse(&raw, TokenKeys::OAUTH1);
        if token.primary.is_none() {
            error!("Access token response from {} lacks oauth_token", id);
            return Err(AuthError::AccessToken(TransportError::Payload(
                "missing oauth_token".into(),
            )));
        }

        info!(provider = %id, stage = ?Stage::AccessTokenFetched, "OAuth1 handshake complete");
        Ok(TokenGrant { raw, token })
    }

    async fn fetch_profile(&self, token: &ParsedToken) -> AuthResult<Value> {
        fetch_profile_data(self.http.as_ref(), &self.profile, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use crate::testing::FakeHttp;

    const REQUEST_TOKEN: &str = "oauth_token=req-tok&oauth_token_secret=req-secret&oauth_callback_confirmed=true";
    const ACCESS_TOKEN: &str = "oauth_token=acc-tok&oauth_token_secret=acc-secret&user_id=12&screen_name=jack";

    fn twitter() -> Arc<ProviderProfile> {
        Arc::new(
            ProviderProfile::oauth1(
                "twitter",
                "Twitter",
                "https://api.twitter.example/oauth/request_token",
                "https://api.twitter.example/oauth/authenticate",
                "https://api.twitter.example/oauth/access_token",
                "https://api.twitter.example/1.1/account/verify_credentials.json",
            )
            .with_consumer("ck", "cs"),
        )
    }

    fn handshake(http: &Arc<FakeHttp>) -> OAuth1Handshake {
        OAuth1Handshake::new(twitter(), http.clone())
    }

    #[tokio::test]
    async fn test_begin_stores_raw_request_token() {
        let http = Arc::new(FakeHttp::new().respond(200, REQUEST_TOKEN));
        let mut session = MemorySession::new();

        let url = handshake(&http)
            .begin(&mut session, "https://app.example/cb", &[], &[])
            .await
            .unwrap();

        assert_eq!(
            url,
            "https://api.twitter.example/oauth/authenticate?oauth_token=req-tok&oauth_callback=https%3A%2F%2Fapp.example%2Fcb"
        );
        assert_eq!(
            session.get("connected-accounts-twitter-request-token").as_deref(),
            Some(REQUEST_TOKEN)
        );

        let sent = http.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://api.twitter.example/oauth/request_token");
        let auth = sent[0].header_value("Authorization").unwrap();
        assert!(auth.contains("oauth_callback=\"https%3A%2F%2Fapp.example%2Fcb\""));
        assert!(auth.contains("oauth_consumer_key=\"ck\""));
        assert!(!auth.contains("oauth_token="));
    }

    #[tokio::test]
    async fn test_begin_extra_params_keep_request_token() {
        let http = Arc::new(FakeHttp::new().respond(200, REQUEST_TOKEN));
        let mut session = MemorySession::new();
        let extra = [
            ("force_login".to_string(), "true".to_string()),
            ("oauth_token".to_string(), "forged".to_string()),
        ];

        let url = handshake(&http)
            .begin(&mut session, "https://app.example/cb", &[], &extra)
            .await
            .unwrap();

        assert!(url.ends_with("?oauth_token=req-tok&oauth_callback=https%3A%2F%2Fapp.example%2Fcb&force_login=true"));
    }

    #[tokio::test]
    async fn test_begin_request_token_failure() {
        let http = Arc::new(FakeHttp::new().respond(401, "Invalid consumer"));
        let mut session = MemorySession::new();

        let err = handshake(&http)
            .begin(&mut session, "https://app.example/cb", &[], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RequestToken(_)));
        assert_eq!(err.failed_at(), Some(Stage::Start));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_begin_rejects_incomplete_request_token() {
        let http = Arc::new(FakeHttp::new().respond(200, "oauth_token=only-token"));
        let mut session = MemorySession::new();

        let err = handshake(&http)
            .begin(&mut session, "https://app.example/cb", &[], &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::RequestToken(TransportError::Payload(_))));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_complete_without_begin_makes_no_call() {
        let http = Arc::new(FakeHttp::new());
        let mut session = MemorySession::new();
        let callback = CallbackRequest::from_query(
            "https://app.example/cb",
            "oauth_token=req-tok&oauth_verifier=v",
        );

        let err = handshake(&http).complete(&mut session, &callback).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingSessionState(ref id) if id == "twitter"));
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_complete_without_verifier_consumes_state() {
        let http = Arc::new(FakeHttp::new());
        let mut session = MemorySession::new();
        session.set("connected-accounts-twitter-request-token", REQUEST_TOKEN.to_string());
        let callback = CallbackRequest::from_query("https://app.example/cb", "denied=req-tok");

        let err = handshake(&http).complete(&mut session, &callback).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingVerifier));
        assert_eq!(http.calls(), 0);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_complete_exchanges_verifier() {
        let http = Arc::new(FakeHttp::new().respond(200, ACCESS_TOKEN));
        let mut session = MemorySession::new();
        session.set("connected-accounts-twitter-request-token", REQUEST_TOKEN.to_string());
        let callback = CallbackRequest::from_query(
            "https://app.example/cb",
            "oauth_token=req-tok&oauth_verifier=verif",
        );

        let grant = handshake(&http).complete(&mut session, &callback).await.unwrap();

        assert_eq!(grant.raw, ACCESS_TOKEN);
        assert_eq!(grant.token.primary.as_deref(), Some("acc-tok"));
        assert_eq!(grant.token.secondary.as_deref(), Some("acc-secret"));
        assert_eq!(grant.token.expires_at, None);
        assert!(session.is_empty());

        let sent = http.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url, "https://api.twitter.example/oauth/access_token");
        let auth = sent[0].header_value("Authorization").unwrap();
        assert!(auth.contains("oauth_token=\"req-tok\""));
        assert!(auth.contains("oauth_verifier=\"verif\""));
    }

    #[tokio::test]
    async fn test_complete_access_token_failure() {
        let http = Arc::new(FakeHttp::new().fail("connection reset"));
        let mut session = MemorySession::new();
        session.set("connected-accounts-twitter-request-token", REQUEST_TOKEN.to_string());
        let callback = CallbackRequest::from_query("https://app.example/cb", "oauth_verifier=v");

        let err = handshake(&http).complete(&mut session, &callback).await.unwrap_err();

        assert!(matches!(err, AuthError::AccessToken(TransportError::Request(_))));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_profile_request_is_signed_with_access_token() {
        let http = Arc::new(FakeHttp::new().respond(200, r#"{"id": 12, "screen_name": "jack"}"#));
        let token = token::parse(ACCESS_TOKEN, TokenKeys::OAUTH1);

        let data = handshake(&http).fetch_profile(&token).await.unwrap();

        assert_eq!(data["screen_name"], "jack");
        let auth = http.requests()[0].header_value("Authorization").unwrap().to_string();
        assert!(auth.contains("oauth_token=\"acc-tok\""));
    }

    #[tokio::test]
    async fn test_oauth1_has_nothing_to_refresh() {
        let http = Arc::new(FakeHttp::new());
        let token = token::parse(ACCESS_TOKEN, TokenKeys::OAUTH1);
        assert!(handshake(&http).refresh(&token).await.is_none());
        assert_eq!(http.calls(), 0);
    }
}
