//! Account Broker
//!
//! Entry point for applications: starts handshakes, turns callbacks into
//! stored accounts, and hands out (refreshed) API tokens for stored accounts.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::account::{AccountRecord, AccountResolver, AccountUpdate};
use crate::common::{AuthError, AuthResult, HttpClient};
use crate::provider::{CallbackRequest, Handshake, ProviderProfile};
use crate::registry::{ProviderChoice, ProviderRegistry};
use crate::session::SessionStore;
use crate::store::{AccountInfo, AccountStore};
use crate::token::ParsedToken;

/// Tokens expiring within this window are refreshed before being handed out.
const REFRESH_MARGIN_SECS: i64 = 60;

pub struct AccountBroker {
    registry: Arc<ProviderRegistry>,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn AccountStore>,
}

impl AccountBroker {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn AccountStore>,
    ) -> Self {
        Self { registry, http, store }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Providers a user can connect to, ordered by display name.
    pub fn list_enabled_providers(&self) -> Vec<ProviderChoice> {
        self.registry.enabled_choices()
    }

    /// Start a handshake; returns the URL to send the user to.
    pub async fn redirect_target(
        &self,
        provider_id: &str,
        session: &mut dyn SessionStore,
        callback_url: &str,
        extra_scope: &[String],
        extra_params: &[(String, String)],
    ) -> AuthResult<String> {
        let handshake = self.enabled_handshake(provider_id)?;
        handshake
            .begin(session, callback_url, extra_scope, extra_params)
            .await
    }

    /// Finish a handshake and store the account.
    ///
    /// Returns the stored record and whether it was newly created.
    pub async fn handle_callback(
        &self,
        provider_id: &str,
        session: &mut dyn SessionStore,
        callback: &CallbackRequest,
    ) -> AuthResult<(AccountRecord, bool)> {
        let handshake = self.enabled_handshake(provider_id)?;
        let grant = handshake.complete(session, callback).await?;
        let profile_data = handshake.fetch_profile(&grant.token).await?;

        let resolver = AccountResolver::new(&handshake.profile().identity);
        let uid = resolver.extract_uid(&profile_data).map_err(|e| {
            error!("No uid in {} profile data", provider_id);
            e
        })?;
        let extra_data = resolver.extract_extra_data(&profile_data);
        let fields = resolver.fields_from_extra(&extra_data, Some(&uid));

        let update = AccountUpdate {
            raw_token: grant.raw,
            token: grant.token,
            fields,
            extra_data,
        };
        let (record, created) = self.store.upsert_account(provider_id, &uid, update).await?;

        info!(
            "{} account {}:{}",
            if created { "Connected new" } else { "Reconnected" },
            provider_id,
            uid
        );
        Ok((record, created))
    }

    /// List stored accounts (no secrets).
    pub async fn accounts(&self, provider_filter: Option<&str>) -> AuthResult<Vec<AccountInfo>> {
        Ok(self.store.list_accounts(provider_filter).await?)
    }

    pub async fn account(&self, provider_id: &str, uid: &str) -> AuthResult<AccountRecord> {
        self.store
            .get_account(provider_id, uid)
            .await?
            .ok_or_else(|| AuthError::AccountNotFound(provider_id.to_string(), uid.to_string()))
    }

    /// Force a refresh-token exchange for a stored account.
    pub async fn refresh_account(&self, provider_id: &str, uid: &str) -> AuthResult<AccountRecord> {
        let handshake = self.handshake(provider_id)?;
        let record = self.account(provider_id, uid).await?;
        self.refresh_record(handshake.as_ref(), &record).await
    }

    /// The token an API client should use for a stored account.
    ///
    /// Tokens about to expire are refreshed first. If that fails, an expired
    /// token is an error and a still-valid one is returned anyway.
    pub async fn access_token(&self, provider_id: &str, uid: &str) -> AuthResult<String> {
        let handshake = self.handshake(provider_id)?;
        let mut record = self.account(provider_id, uid).await?;

        let now = Utc::now();
        if record.token.expires_within(now, Duration::seconds(REFRESH_MARGIN_SECS)) {
            match self.refresh_record(handshake.as_ref(), &record).await {
                Ok(refreshed) => record = refreshed,
                Err(e) if !record.is_expired(now) => {
                    warn!("Token refresh failed but token not yet expired: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        record
            .api_token(handshake.profile())
            .ok_or_else(|| AuthError::MissingAccessToken(provider_id.to_string(), uid.to_string()))
    }

    pub async fn remove_account(&self, provider_id: &str, uid: &str) -> AuthResult<()> {
        if !self.store.delete_account(provider_id, uid).await? {
            return Err(AuthError::AccountNotFound(provider_id.to_string(), uid.to_string()));
        }
        info!("Removed account {}:{}", provider_id, uid);
        Ok(())
    }

    fn profile(&self, provider_id: &str) -> AuthResult<Arc<ProviderProfile>> {
        self.registry.by_id(provider_id).ok_or_else(|| {
            warn!("Unknown provider requested: {}", provider_id);
            AuthError::UnknownProvider(provider_id.to_string())
        })
    }

    fn handshake(&self, provider_id: &str) -> AuthResult<Arc<dyn Handshake>> {
        let profile = self.profile(provider_id)?;
        Ok(crate::provider::handshake_for(profile, self.http.clone()))
    }

    /// Handshake for a provider that may start or finish a connection.
    fn enabled_handshake(&self, provider_id: &str) -> AuthResult<Arc<dyn Handshake>> {
        let profile = self.profile(provider_id)?;
        if !profile.is_enabled() {
            warn!("Provider {} has no consumer credentials configured", provider_id);
            return Err(AuthError::ProviderDisabled(provider_id.to_string()));
        }
        Ok(crate::provider::handshake_for(profile, self.http.clone()))
    }

    async fn refresh_record(
        &self,
        handshake: &dyn Handshake,
        record: &AccountRecord,
    ) -> AuthResult<AccountRecord> {
        let (provider_id, uid) = (&record.provider_id, &record.uid);
        let Some(grant) = handshake.refresh(&record.token).await else {
            return Err(AuthError::RefreshFailed(provider_id.clone(), uid.clone()));
        };

        // Providers may omit the refresh token from a refresh answer
        let token = ParsedToken {
            secondary: grant.token.secondary.or_else(|| record.token.secondary.clone()),
            ..grant.token
        };
        let updated = self
            .store
            .update_token(provider_id, uid, grant.raw, token)
            .await?;

        info!("Refreshed token for {}:{}", provider_id, uid);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountFields;
    use crate::common::{query_param, ErrorCode, ErrorKind};
    use crate::config::{Config, ProviderConfig};
    use crate::session::MemorySession;
    use crate::store::MemoryAccountStore;
    use crate::testing::FakeHttp;
    use serde_json::json;

    const CALLBACK: &str = "https://app.example/connected-accounts/google/callback";

    fn config(ids: &[&str]) -> Config {
        let mut config = Config::default();
        for id in ids {
            config.providers.insert(
                id.to_string(),
                ProviderConfig {
                    consumer_key: format!("{}-key", id),
                    consumer_secret: format!("{}-secret", id),
                    ..Default::default()
                },
            );
        }
        config
    }

    fn broker(ids: &[&str], http: &Arc<FakeHttp>) -> (AccountBroker, Arc<MemoryAccountStore>) {
        let store = Arc::new(MemoryAccountStore::new());
        let registry = Arc::new(ProviderRegistry::with_builtin(&config(ids)));
        (AccountBroker::new(registry, http.clone(), store.clone()), store)
    }

    async fn seed(store: &MemoryAccountStore, provider: &str, uid: &str, token: ParsedToken, extra: serde_json::Value) {
        store
            .upsert_account(
                provider,
                uid,
                AccountUpdate {
                    raw_token: "seeded".into(),
                    token,
                    fields: AccountFields::default(),
                    extra_data: extra,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_google_end_to_end() {
        let http = Arc::new(
            FakeHttp::new()
                .respond(200, r#"{"access_token": "ya29.abc", "refresh_token": "1/r", "expires_in": 3600}"#)
                .respond(200, r#"{"id": "108", "email": "a@b.com", "name": "Ann", "picture": "https://img/a.png"}"#)
                .respond(200, r#"{"access_token": "ya29.def", "expires_in": 3600}"#)
                .respond(200, r#"{"id": "108", "email": "a@b.com", "name": "Ann B"}"#),
        );
        let (broker, store) = broker(&["google"], &http);
        let mut session = MemorySession::new();

        let url = broker.redirect_target("google", &mut session, CALLBACK, &[], &[]).await.unwrap();
        let state = session.get("connected-accounts-google-application-state").unwrap();
        assert_eq!(state.len(), 32);
        let (_, query) = url.split_once('?').unwrap();
        assert_eq!(query_param(query, "state").as_deref(), Some(state.as_str()));
        assert_eq!(query_param(query, "client_id").as_deref(), Some("google-key"));

        let callback = CallbackRequest::from_query(CALLBACK, &format!("code=abc123&state={}", state));
        let (record, created) = broker.handle_callback("google", &mut session, &callback).await.unwrap();

        assert!(created);
        assert!(session.is_empty());
        assert_eq!(record.uid, "108");
        assert_eq!(record.token.primary.as_deref(), Some("ya29.abc"));
        assert_eq!(record.token.secondary.as_deref(), Some("1/r"));
        assert!(record.token.expires_at.is_some());
        assert_eq!(record.fields.email.as_deref(), Some("a@b.com"));
        assert_eq!(record.fields.avatar_url.as_deref(), Some("https://img/a.png"));

        let sent = http.requests();
        assert_eq!(sent[0].form_value("code"), Some("abc123"));
        assert_eq!(sent[0].form_value("redirect_uri"), Some(CALLBACK));
        assert_eq!(sent[1].query_value("access_token"), Some("ya29.abc"));

        // Reconnecting the same account updates it in place
        broker.redirect_target("google", &mut session, CALLBACK, &[], &[]).await.unwrap();
        let state = session.get("connected-accounts-google-application-state").unwrap();
        let callback = CallbackRequest::from_query(CALLBACK, &format!("code=again&state={}", state));
        let (record, created) = broker.handle_callback("google", &mut session, &callback).await.unwrap();

        assert!(!created);
        assert_eq!(record.fields.name.as_deref(), Some("Ann B"));
        assert_eq!(store.list_accounts(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_twitter_end_to_end() {
        let http = Arc::new(
            FakeHttp::new()
                .respond(200, "oauth_token=rt&oauth_token_secret=rs&oauth_callback_confirmed=true")
                .respond(200, "oauth_token=at&oauth_token_secret=as&user_id=12&screen_name=jack")
                .respond(200, r#"{"id": 12, "name": "Jack", "screen_name": "jack"}"#),
        );
        let (broker, _) = broker(&["twitter"], &http);
        let mut session = MemorySession::new();
        let callback_url = "https://app.example/cb";

        let url = broker.redirect_target("twitter", &mut session, callback_url, &[], &[]).await.unwrap();
        assert!(url.starts_with("https://api.twitter.com/oauth/authenticate?oauth_token=rt"));

        let callback = CallbackRequest::from_query(callback_url, "oauth_token=rt&oauth_verifier=v");
        let (record, _) = broker.handle_callback("twitter", &mut session, &callback).await.unwrap();

        assert_eq!(record.uid, "12");
        assert_eq!(record.token.secondary.as_deref(), Some("as"));
        assert_eq!(record.fields.username.as_deref(), Some("jack"));
        let profile = broker.registry().by_id("twitter").unwrap();
        assert_eq!(record.display_name(&profile), "@jack");
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_providers() {
        let http = Arc::new(FakeHttp::new());
        let (broker, _) = broker(&["twitter"], &http);
        let mut session = MemorySession::new();

        let err = broker.redirect_target("myspace", &mut session, CALLBACK, &[], &[]).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownProvider(_)));
        let err = broker.redirect_target("google", &mut session, CALLBACK, &[], &[]).await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderDisabled(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        assert_eq!(http.calls(), 0);
        assert!(session.is_empty());
        assert_eq!(broker.list_enabled_providers().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_identity_stores_nothing() {
        let http = Arc::new(
            FakeHttp::new()
                .respond(200, r#"{"access_token": "t"}"#)
                .respond(200, r#"{"data": {"username": "no-id"}}"#),
        );
        let (broker, store) = broker(&["instagram"], &http);
        let mut session = MemorySession::new();
        session.set("connected-accounts-instagram-application-state", "s".repeat(32));
        let callback = CallbackRequest::from_query(CALLBACK, &format!("code=c&state={}", "s".repeat(32)));

        let err = broker.handle_callback("instagram", &mut session, &callback).await.unwrap_err();

        assert!(matches!(err, AuthError::UnresolvableIdentity));
        assert!(store.list_accounts(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_account_keeps_refresh_token() {
        let http = Arc::new(FakeHttp::new().respond(200, r#"{"access_token": "new", "expires_in": 3600}"#));
        let (broker, store) = broker(&["google"], &http);
        let old = ParsedToken {
            primary: Some("old".into()),
            secondary: Some("refresh".into()),
            expires_at: Some(Utc::now() - Duration::hours(1)),
        };
        seed(&store, "google", "108", old, json!({})).await;

        let record = broker.refresh_account("google", "108").await.unwrap();

        assert_eq!(record.token.primary.as_deref(), Some("new"));
        assert_eq!(record.token.secondary.as_deref(), Some("refresh"));
        assert!(!record.is_expired(Utc::now()));
        assert_eq!(record.raw_token, r#"{"access_token": "new", "expires_in": 3600}"#);
        assert_eq!(http.requests()[0].form_value("refresh_token"), Some("refresh"));
    }

    #[tokio::test]
    async fn test_access_token_refreshes_expired() {
        let http = Arc::new(FakeHttp::new().respond(200, r#"{"access_token": "fresh", "expires_in": 3600}"#));
        let (broker, store) = broker(&["google"], &http);
        let expired = ParsedToken {
            primary: Some("stale".into()),
            secondary: Some("r".into()),
            expires_at: Some(Utc::now() - Duration::seconds(5)),
        };
        seed(&store, "google", "1", expired, json!({})).await;

        assert_eq!(broker.access_token("google", "1").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_access_token_refresh_failure() {
        let http = Arc::new(FakeHttp::new().respond(400, r#"{"error": "invalid_grant"}"#).respond(400, "{}"));
        let (broker, store) = broker(&["google"], &http);

        let expired = ParsedToken {
            primary: Some("stale".into()),
            secondary: Some("r".into()),
            expires_at: Some(Utc::now() - Duration::seconds(5)),
        };
        seed(&store, "google", "expired", expired, json!({})).await;
        let err = broker.access_token("google", "expired").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(..)));

        let expiring = ParsedToken {
            primary: Some("still-good".into()),
            secondary: Some("r".into()),
            expires_at: Some(Utc::now() + Duration::seconds(30)),
        };
        seed(&store, "google", "expiring", expiring, json!({})).await;
        assert_eq!(broker.access_token("google", "expiring").await.unwrap(), "still-good");
    }

    #[tokio::test]
    async fn test_access_token_without_primary_token() {
        let http = Arc::new(FakeHttp::new());
        let (broker, store) = broker(&["disqus"], &http);
        seed(&store, "disqus", "7", ParsedToken::default(), json!({})).await;

        let err = broker.access_token("disqus", "7").await.unwrap_err();

        assert!(matches!(err, AuthError::MissingAccessToken(..)));
        assert_eq!(err.kind(), ErrorKind::Account);
        assert_eq!(err.code(), ErrorCode::AccessTokenMissing);
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_mailchimp_access_token_suffix() {
        let http = Arc::new(FakeHttp::new());
        let (broker, store) = broker(&["mailchimp"], &http);
        let token = ParsedToken {
            primary: Some("abc".into()),
            ..Default::default()
        };
        seed(&store, "mailchimp", "9", token, json!({"dc": "us6"})).await;

        assert_eq!(broker.access_token("mailchimp", "9").await.unwrap(), "abc-us6");
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_accounts() {
        let http = Arc::new(FakeHttp::new());
        let (broker, _) = broker(&["google"], &http);

        assert!(matches!(
            broker.access_token("google", "nobody").await,
            Err(AuthError::AccountNotFound(..))
        ));
        assert!(matches!(
            broker.remove_account("google", "nobody").await,
            Err(AuthError::AccountNotFound(..))
        ));
        assert!(matches!(
            broker.refresh_account("myspace", "x").await,
            Err(AuthError::UnknownProvider(_))
        ));
    }
}
