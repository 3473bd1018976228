//! Outgoing Request Encoding
//!
//! OAuth1 signs every request (HMAC-SHA1 over the RFC 5849 signature base
//! string, sent as an `Authorization: OAuth ...` header). OAuth2 only presents
//! the access token, as an `access_token` query parameter.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha1::Sha1;

use super::ParsedToken;
use crate::common::{parse_query_pairs, HttpRequest, TransportError};
use crate::provider::Protocol;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// Application (consumer) credentials issued by the provider.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Consumer {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Extra OAuth1 protocol parameters carried in the signed header.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningParams<'a> {
    pub callback: Option<&'a str>,
    pub verifier: Option<&'a str>,
}

/// Attach the protocol's credential to an outgoing request.
///
/// With `token == None`, OAuth1 produces a one-legged (consumer-only)
/// signature and OAuth2 leaves the request untouched.
pub fn encode_outgoing(
    protocol: Protocol,
    request: HttpRequest,
    token: Option<&ParsedToken>,
    consumer: &Consumer,
    extra: SigningParams<'_>,
) -> Result<HttpRequest, TransportError> {
    match protocol {
        Protocol::OAuth1 => {
            let timestamp = chrono::Utc::now().timestamp().to_string();
            sign_oauth1(request, consumer, token, extra, &generate_nonce(), &timestamp)
        }
        Protocol::OAuth2 => Ok(match token.and_then(|t| t.primary.as_deref()) {
            Some(access_token) => request.query("access_token", access_token),
            None => request,
        }),
    }
}

/// Sign `request` with an explicit nonce and timestamp.
pub fn sign_oauth1(
    request: HttpRequest,
    consumer: &Consumer,
    token: Option<&ParsedToken>,
    extra: SigningParams<'_>,
    nonce: &str,
    timestamp: &str,
) -> Result<HttpRequest, TransportError> {
    let mut oauth_params: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), consumer.key.clone()),
        ("oauth_nonce".into(), nonce.to_string()),
        ("oauth_signature_method".into(), SIGNATURE_METHOD.into()),
        ("oauth_timestamp".into(), timestamp.to_string()),
        ("oauth_version".into(), OAUTH_VERSION.into()),
    ];
    if let Some(callback) = extra.callback {
        oauth_params.push(("oauth_callback".into(), callback.to_string()));
    }
    if let Some(oauth_token) = token.and_then(|t| t.primary.as_deref()) {
        oauth_params.push(("oauth_token".into(), oauth_token.to_string()));
    }
    if let Some(verifier) = extra.verifier {
        oauth_params.push(("oauth_verifier".into(), verifier.to_string()));
    }

    let base = signature_base_string(&request, &oauth_params);
    let token_secret = token.and_then(|t| t.secondary.as_deref()).unwrap_or("");
    let key = format!("{}&{}", encode(&consumer.secret), encode(token_secret));

    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| TransportError::Signing(e.to_string()))?;
    mac.update(base.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    oauth_params.push(("oauth_signature".into(), signature));
    let header = format!(
        "OAuth {}",
        oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(request.header("Authorization", header))
}

/// RFC 5849 §3.4.1 signature base string.
fn signature_base_string(request: &HttpRequest, oauth_params: &[(String, String)]) -> String {
    let (base_url, url_query) = match request.url.split_once('?') {
        Some((base, query)) => (base, parse_query_pairs(query)),
        None => (request.url.as_str(), Vec::new()),
    };
    let base_url = base_url.split('#').next().unwrap_or(base_url);

    let mut params: Vec<(String, String)> = url_query
        .iter()
        .chain(request.query.iter())
        .chain(request.form.iter())
        .chain(oauth_params.iter())
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    params.sort();

    let normalized = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        request.method.as_str(),
        encode(base_url),
        encode(&normalized)
    )
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn generate_nonce() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{parse, TokenKeys};

    fn twitter_consumer() -> Consumer {
        Consumer {
            key: "xvz1evFS4wEEPTGEFPHBog".into(),
            secret: "kAcSOqF21Fu85e7zjz7ZN2U4ZRhfV3WpwPAoE3Z7kBw".into(),
        }
    }

    fn header_param(header: &str, name: &str) -> Option<String> {
        header
            .trim_start_matches("OAuth ")
            .split(", ")
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| *k == name)
            .and_then(|(_, v)| urlencoding::decode(v.trim_matches('"')).ok())
            .map(|v| v.into_owned())
    }

    #[test]
    fn test_three_legged_signature_matches_reference() {
        // Worked example from Twitter's "Creating a signature" documentation
        let token = ParsedToken {
            primary: Some("370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb".into()),
            secondary: Some("LswwdoUaIvS8ltyTt5jkRh4J50vUPVVHtR2YPi5kE".into()),
            expires_at: None,
        };
        let request = HttpRequest::post("https://api.twitter.com/1.1/statuses/update.json")
            .query("include_entities", "true")
            .form("status", "Hello Ladies + Gentlemen, a signed OAuth request!");

        let signed = sign_oauth1(
            request,
            &twitter_consumer(),
            Some(&token),
            SigningParams::default(),
            "kYjzVBB8Y0ZFabxSWbWovY3uYSQ2pTgmZeNu2VS4cg",
            "1318622958",
        )
        .unwrap();

        let header = signed.header_value("Authorization").unwrap();
        assert!(header.starts_with("OAuth "));
        assert_eq!(
            header_param(header, "oauth_signature").as_deref(),
            Some("tnnArxj06cWHq44gCs1OSKk/jLY=")
        );
        assert_eq!(
            header_param(header, "oauth_token").as_deref(),
            Some("370773112-GmHxMAgYyLbNEtIKZeRNFsMKPR9EyMZeS9weJAEb")
        );
    }

    #[test]
    fn test_one_legged_signature_carries_callback_only() {
        let request = HttpRequest::post("https://api.twitter.com/oauth/request_token");
        let signed = sign_oauth1(
            request,
            &twitter_consumer(),
            None,
            SigningParams {
                callback: Some("https://app.example/cb"),
                verifier: None,
            },
            "nonce",
            "1",
        )
        .unwrap();

        let header = signed.header_value("Authorization").unwrap();
        assert_eq!(
            header_param(header, "oauth_callback").as_deref(),
            Some("https://app.example/cb")
        );
        assert_eq!(header_param(header, "oauth_token"), None);
        assert_eq!(header_param(header, "oauth_verifier"), None);
    }

    #[test]
    fn test_signature_depends_on_token_secret() {
        let request = HttpRequest::get("https://api.example/me");
        let a = ParsedToken {
            primary: Some("tok".into()),
            secondary: Some("secret-a".into()),
            expires_at: None,
        };
        let b = ParsedToken {
            secondary: Some("secret-b".into()),
            ..a.clone()
        };
        let sig = |t: &ParsedToken| {
            let signed = sign_oauth1(
                request.clone(),
                &twitter_consumer(),
                Some(t),
                SigningParams::default(),
                "n",
                "1",
            )
            .unwrap();
            header_param(signed.header_value("Authorization").unwrap(), "oauth_signature")
        };
        assert_ne!(sig(&a), sig(&b));
    }

    #[test]
    fn test_oauth2_access_token_round_trips_into_query() {
        for access_token in ["tok1", "ya29.a0Af+H/x==", "EAAB ZCd&weird=chars"] {
            let raw = serde_json::json!({"access_token": access_token, "expires_in": 60}).to_string();
            let token = parse(&raw, TokenKeys::oauth2(Some("expires_in")));
            let request = encode_outgoing(
                Protocol::OAuth2,
                HttpRequest::get("https://graph.example/me"),
                Some(&token),
                &Consumer::default(),
                SigningParams::default(),
            )
            .unwrap();
            assert_eq!(request.query_value("access_token"), Some(access_token));
            assert!(request.header_value("Authorization").is_none());
        }
    }

    #[test]
    fn test_oauth2_without_token_is_untouched() {
        let request = HttpRequest::get("https://graph.example/me");
        let encoded = encode_outgoing(
            Protocol::OAuth2,
            request.clone(),
            None,
            &Consumer::default(),
            SigningParams::default(),
        )
        .unwrap();
        assert_eq!(encoded, request);
    }

    #[test]
    fn test_nonce_is_random() {
        let a = generate_nonce();
        assert_eq!(a.len(), 32);
        assert_ne!(a, generate_nonce());
    }
}
