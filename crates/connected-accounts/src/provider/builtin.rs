//! Built-in provider definitions.
//!
//! Each function returns the provider's data-only profile without consumer
//! credentials; [`configured`] layers in what the [`Config`] supplies.

use super::{ProfileRequest, ProviderProfile};
use crate::account::{FieldRule, IdentityRules, TokenSuffix};
use crate::config::Config;

pub const BUILTIN_IDS: [&str; 7] = [
    "bitly",
    "disqus",
    "facebook",
    "google",
    "instagram",
    "mailchimp",
    "twitter",
];

pub fn twitter() -> ProviderProfile {
    ProviderProfile::oauth1(
        "twitter",
        "Twitter",
        "https://api.twitter.com/oauth/request_token",
        "https://api.twitter.com/oauth/authenticate",
        "https://api.twitter.com/oauth/access_token",
        "https://api.twitter.com/1.1/account/verify_credentials.json",
    )
    .with_identity(IdentityRules {
        username: Some(FieldRule::field("screen_name")),
        email: None,
        avatar_url: Some(FieldRule::replace("profile_image_url", "_normal", "")),
        profile_url: Some(FieldRule::template("http://twitter.com/{screen_name}")),
        display_name: Some(FieldRule::template("@{screen_name}")),
        ..Default::default()
    })
}

pub fn facebook() -> ProviderProfile {
    ProviderProfile::oauth2(
        "facebook",
        "Facebook",
        "https://www.facebook.com/dialog/oauth",
        "https://graph.facebook.com/oauth/access_token",
        "https://graph.facebook.com/me",
    )
    .with_scope(["email", "public_profile", "user_friends"])
    .with_expires_in_key(Some("expires"))
    .with_identity(IdentityRules {
        avatar_url: Some(FieldRule::template(
            "https://graph.facebook.com/v2.3/{uid}/picture?type=square&height=600&width=600&return_ssl_resources=1",
        )),
        profile_url: Some(FieldRule::field("link")),
        ..Default::default()
    })
}

pub fn google() -> ProviderProfile {
    ProviderProfile::oauth2(
        "google",
        "Google+",
        "https://accounts.google.com/o/oauth2/auth",
        "https://accounts.google.com/o/oauth2/token",
        "https://www.googleapis.com/oauth2/v1/userinfo",
    )
    .with_scope(["https://www.googleapis.com/auth/plus.login", "email"])
    .with_auth_param("access_type", "offline")
    .with_auth_param("approval_prompt", "force")
    .with_identity(IdentityRules {
        avatar_url: Some(FieldRule::field("picture")),
        profile_url: Some(FieldRule::field("link")),
        ..Default::default()
    })
}

pub fn instagram() -> ProviderProfile {
    ProviderProfile::oauth2(
        "instagram",
        "Instagram",
        "https://api.instagram.com/oauth/authorize",
        "https://api.instagram.com/oauth/access_token",
        "https://api.instagram.com/v1/users/self",
    )
    .with_scope(["basic"])
    .with_identity(IdentityRules {
        envelope: Some("data".into()),
        name: Some(FieldRule::field("full_name")),
        email: None,
        username: Some(FieldRule::field("username")),
        avatar_url: Some(FieldRule::field("profile_picture")),
        profile_url: Some(FieldRule::template("http://instagram.com/{username}")),
        display_name: Some(FieldRule::field("username")),
        ..Default::default()
    })
}

pub fn mailchimp() -> ProviderProfile {
    ProviderProfile::oauth2(
        "mailchimp",
        "MailChimp",
        "https://login.mailchimp.com/oauth2/authorize",
        "https://login.mailchimp.com/oauth2/token",
        "https://login.mailchimp.com/oauth2/metadata",
    )
    .with_expires_in_key(None)
    .with_profile_request(ProfileRequest::OAuthHeader)
    .with_identity(IdentityRules {
        uid_field: "user_id".into(),
        name: Some(FieldRule::field("accountname")),
        email: None,
        display_name: Some(FieldRule::field("accountname")),
        token_suffix: Some(TokenSuffix {
            field: "dc".into(),
            default: "us1".into(),
        }),
        ..Default::default()
    })
}

pub fn bitly() -> ProviderProfile {
    ProviderProfile::oauth2(
        "bitly",
        "Bitly",
        "https://bitly.com/oauth/authorize",
        "https://api-ssl.bitly.com/oauth/access_token",
        "https://api-ssl.bitly.com/v3/user/info",
    )
    .with_identity(IdentityRules {
        envelope: Some("data".into()),
        uid_field: "login".into(),
        name: Some(FieldRule::field("full_name")),
        email: None,
        username: Some(FieldRule::field("login")),
        profile_url: Some(FieldRule::field("profile_url")),
        display_name: Some(FieldRule::field("full_name")),
        ..Default::default()
    })
}

pub fn disqus() -> ProviderProfile {
    ProviderProfile::oauth2(
        "disqus",
        "Disqus",
        "https://disqus.com/api/oauth/2.0/authorize/",
        "https://disqus.com/api/oauth/2.0/access_token/",
        "https://disqus.com/api/3.0/users/details.json",
    )
    .with_scope(["read", "write"])
    .with_scope_separator(",")
    .with_profile_request(ProfileRequest::ApiKeyParams)
    .with_identity(IdentityRules {
        envelope: Some("response".into()),
        username: Some(FieldRule::field("username")),
        avatar_url: Some(FieldRule::template(
            "https://disqus.com/api/users/avatars/{username}.jpg",
        )),
        profile_url: Some(FieldRule::field("profileUrl")),
        ..Default::default()
    })
}

/// All built-in providers with default settings.
pub fn all() -> Vec<ProviderProfile> {
    vec![
        bitly(),
        disqus(),
        facebook(),
        google(),
        instagram(),
        mailchimp(),
        twitter(),
    ]
}

/// Apply configured credentials, scope and authorize parameters.
pub fn configured(profile: ProviderProfile, config: &Config) -> ProviderProfile {
    let Some(settings) = config.provider(&profile.id) else {
        return profile;
    };

    let mut profile = profile.with_consumer(&settings.consumer_key, &settings.consumer_secret);
    if let Some(scope) = &settings.scope {
        profile = profile.with_scope(scope.iter().cloned());
    }
    for (key, value) in &settings.auth_params {
        profile = profile.with_auth_param(key, value);
    }
    profile
}
