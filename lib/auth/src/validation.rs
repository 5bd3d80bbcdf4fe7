//! Bearer token validation.
//!
//! Tokens are verified against either a shared secret (HS256, for local
//! development and tests) or a remote JSON Web Key Set, located directly or
//! through OpenID metadata. Remote keys are cached and refreshed when a token
//! names a key the cache does not hold.

use crate::claims::Claims;
use crate::error::AuthenticationError;
use async_trait::async_trait;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Allowed clock skew between the token issuer and this host.
const CLOCK_SKEW_SECONDS: u64 = 300;

/// How long a fetched key set is trusted before it is fetched again.
const KEY_SET_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum time between refreshes triggered by unknown key ids.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Verifies the bearer token presented with a request.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validates `token` (the value after `Bearer `) and returns its claims.
    async fn validate(&self, token: Option<&str>) -> Result<Claims, AuthenticationError>;
}

/// Accepts every request as anonymous.
///
/// Used when the host has no app id configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTokenValidator;

#[async_trait]
impl TokenValidator for DisabledTokenValidator {
    async fn validate(&self, token: Option<&str>) -> Result<Claims, AuthenticationError> {
        if token.is_some() {
            debug!("authentication is disabled; ignoring bearer token");
        }
        Ok(Claims::anonymous())
    }
}

/// Where signing keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// HS256 shared secret.
    Secret(Vec<u8>),
    /// URL of a JSON Web Key Set.
    Jwks(String),
    /// URL of OpenID metadata naming a `jwks_uri`.
    OpenIdMetadata(String),
}

#[derive(Debug, Deserialize)]
struct OpenIdMetadata {
    jwks_uri: String,
}

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

struct RemoteKeys {
    source: KeySource,
    http: reqwest::Client,
    cached: RwLock<Option<CachedKeySet>>,
}

impl RemoteKeys {
    async fn key_for(&self, kid: &str) -> Result<Jwk, AuthenticationError> {
        let unknown = || AuthenticationError::UnknownSigningKey {
            kid: Some(kid.to_string()),
        };

        {
            let cached = self.cached.read().await;
            if let Some(set) = cached.as_ref() {
                let age = set.fetched_at.elapsed();
                if age < KEY_SET_LIFETIME {
                    if let Some(jwk) = set.keys.find(kid) {
                        return Ok(jwk.clone());
                    }
                    if age < MIN_REFRESH_INTERVAL {
                        return Err(unknown());
                    }
                }
            }
        }

        let keys = self.fetch().await?;
        let found = keys.find(kid).cloned();
        debug!(keys = keys.keys.len(), "refreshed signing keys");
        *self.cached.write().await = Some(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        });

        found.ok_or_else(unknown)
    }

    async fn fetch(&self) -> Result<JwkSet, AuthenticationError> {
        let jwks_url = match &self.source {
            KeySource::Jwks(url) => url.clone(),
            KeySource::OpenIdMetadata(url) => self.get_json::<OpenIdMetadata>(url).await?.jwks_uri,
            KeySource::Secret(_) => {
                return Err(AuthenticationError::KeySetUnavailable {
                    reason: "shared secrets have no key set".to_string(),
                });
            }
        };
        self.get_json(&jwks_url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AuthenticationError> {
        let unavailable = |err: reqwest::Error| {
            warn!(url, error = %err, "failed to fetch signing keys");
            AuthenticationError::KeySetUnavailable {
                reason: err.to_string(),
            }
        };

        self.http
            .get(url)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?
            .json::<T>()
            .await
            .map_err(unavailable)
    }
}

enum SigningKeys {
    Secret(DecodingKey),
    Remote(RemoteKeys),
}

/// Validates JWT bearer tokens for a single audience.
pub struct JwtTokenValidator {
    audience: String,
    issuers: Vec<String>,
    require_app_id: bool,
    keys: SigningKeys,
}

impl JwtTokenValidator {
    /// Creates a validator accepting tokens issued for `audience`.
    #[must_use]
    pub fn new(audience: impl Into<String>, source: KeySource, http: reqwest::Client) -> Self {
        let keys = match source {
            KeySource::Secret(secret) => SigningKeys::Secret(DecodingKey::from_secret(&secret)),
            source => SigningKeys::Remote(RemoteKeys {
                source,
                http,
                cached: RwLock::new(None),
            }),
        };
        Self {
            audience: audience.into(),
            issuers: Vec::new(),
            require_app_id: false,
            keys,
        }
    }

    /// Restricts accepted issuers. With none set, the issuer is not checked.
    #[must_use]
    pub fn with_issuers(mut self, issuers: Vec<String>) -> Self {
        self.issuers = issuers;
        self
    }

    /// Rejects tokens that do not identify the calling app.
    #[must_use]
    pub fn require_app_id(mut self) -> Self {
        self.require_app_id = true;
        self
    }

    async fn decoding_key(
        &self,
        token: &str,
    ) -> Result<(DecodingKey, Algorithm), AuthenticationError> {
        match &self.keys {
            SigningKeys::Secret(key) => Ok((key.clone(), Algorithm::HS256)),
            SigningKeys::Remote(remote) => {
                let header = decode_header(token).map_err(|err| invalid(&err))?;
                let kid = header
                    .kid
                    .as_deref()
                    .ok_or(AuthenticationError::UnknownSigningKey { kid: None })?;
                let jwk = remote.key_for(kid).await?;
                let key = DecodingKey::from_jwk(&jwk).map_err(|err| invalid(&err))?;
                Ok((key, header.alg))
            }
        }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    #[instrument(skip_all, fields(audience = %self.audience))]
    async fn validate(&self, token: Option<&str>) -> Result<Claims, AuthenticationError> {
        let token = token.ok_or(AuthenticationError::MissingToken)?;
        let (key, algorithm) = self.decoding_key(token).await?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_SECONDS;
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        if !self.issuers.is_empty() {
            validation.set_issuer(&self.issuers);
        }

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(|err| authentication_error(&err))?
            .claims;

        if self.require_app_id && claims.app_id().is_none() {
            return Err(AuthenticationError::MissingClaim {
                claim: "appid".to_string(),
            });
        }

        debug!(app_id = claims.app_id(), "bearer token validated");
        Ok(claims)
    }
}

fn invalid(err: &JwtError) -> AuthenticationError {
    AuthenticationError::InvalidToken {
        reason: err.to_string(),
    }
}

fn authentication_error(err: &JwtError) -> AuthenticationError {
    match err.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
            AuthenticationError::TokenExpired
        }
        ErrorKind::InvalidAudience => AuthenticationError::InvalidAudience,
        ErrorKind::InvalidIssuer => AuthenticationError::InvalidIssuer,
        ErrorKind::MissingRequiredClaim(claim) => AuthenticationError::MissingClaim {
            claim: claim.clone(),
        },
        _ => invalid(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::{Json, Router};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value as JsonValue, json};
    use std::net::SocketAddr;

    const SECRET: &[u8] = b"skillgate-test-secret";
    const HOST_APP_ID: &str = "host-app";
    const RSA_PEM: &[u8] = include_bytes!("../testdata/rsa_key.pem");
    const RSA_MODULUS: &str = include_str!("../testdata/rsa_key.n");

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn skill_claims() -> JsonValue {
        json!({
            "aud": HOST_APP_ID,
            "iss": "https://api.botframework.com",
            "appid": "skill-1",
            "ver": "1.0",
            "exp": now() + 600,
            "nbf": now() - 60,
        })
    }

    fn sign_hs256(claims: &JsonValue) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn sign_rs256(kid: &str, claims: &JsonValue) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &EncodingKey::from_rsa_pem(RSA_PEM).unwrap()).unwrap()
    }

    fn secret_validator() -> JwtTokenValidator {
        JwtTokenValidator::new(
            HOST_APP_ID,
            KeySource::Secret(SECRET.to_vec()),
            reqwest::Client::new(),
        )
    }

    async fn serve_keys() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "kid": "key-1",
                "use": "sig",
                "alg": "RS256",
                "n": RSA_MODULUS.trim(),
                "e": "AQAB",
            }]
        });
        let metadata = json!({ "jwks_uri": format!("http://{addr}/keys") });
        let app = Router::new()
            .route("/keys", get(move || async move { Json(jwks) }))
            .route("/metadata", get(move || async move { Json(metadata) }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn valid_token_yields_claims() {
        let claims = secret_validator()
            .validate(Some(&sign_hs256(&skill_claims())))
            .await
            .unwrap();
        assert_eq!(claims.app_id(), Some("skill-1"));
        assert!(claims.is_skill_claim());
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let err = secret_validator().validate(None).await.unwrap_err();
        assert_eq!(err, AuthenticationError::MissingToken);
    }

    #[tokio::test]
    async fn malformed_token_is_rejected() {
        let err = secret_validator()
            .validate(Some("not-a-jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let mut claims = skill_claims();
        claims["exp"] = json!(now() - 3600);
        let err = secret_validator()
            .validate(Some(&sign_hs256(&claims)))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::TokenExpired);
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let mut claims = skill_claims();
        claims["aud"] = json!("another-bot");
        let err = secret_validator()
            .validate(Some(&sign_hs256(&claims)))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidAudience);
    }

    #[tokio::test]
    async fn untrusted_issuer_is_rejected() {
        let validator =
            secret_validator().with_issuers(vec!["https://sts.example.test/".to_string()]);
        let err = validator
            .validate(Some(&sign_hs256(&skill_claims())))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidIssuer);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &skill_claims(),
            &EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();
        let err = secret_validator().validate(Some(&token)).await.unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn missing_app_id_is_rejected_when_required() {
        let mut claims = skill_claims();
        claims.as_object_mut().unwrap().remove("appid");
        let token = sign_hs256(&claims);

        assert!(secret_validator().validate(Some(&token)).await.is_ok());

        let err = secret_validator()
            .require_app_id()
            .validate(Some(&token))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthenticationError::MissingClaim {
                claim: "appid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn jwks_token_is_accepted() {
        let addr = serve_keys().await;
        let validator = JwtTokenValidator::new(
            HOST_APP_ID,
            KeySource::Jwks(format!("http://{addr}/keys")),
            reqwest::Client::new(),
        );

        let claims = validator
            .validate(Some(&sign_rs256("key-1", &skill_claims())))
            .await
            .unwrap();
        assert_eq!(claims.app_id(), Some("skill-1"));
    }

    #[tokio::test]
    async fn openid_metadata_locates_keys() {
        let addr = serve_keys().await;
        let validator = JwtTokenValidator::new(
            HOST_APP_ID,
            KeySource::OpenIdMetadata(format!("http://{addr}/metadata")),
            reqwest::Client::new(),
        );

        assert!(
            validator
                .validate(Some(&sign_rs256("key-1", &skill_claims())))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn unknown_key_id_is_rejected() {
        let addr = serve_keys().await;
        let validator = JwtTokenValidator::new(
            HOST_APP_ID,
            KeySource::Jwks(format!("http://{addr}/keys")),
            reqwest::Client::new(),
        );

        let err = validator
            .validate(Some(&sign_rs256("key-9", &skill_claims())))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthenticationError::UnknownSigningKey {
                kid: Some("key-9".to_string())
            }
        );
    }

    #[tokio::test]
    async fn unreachable_key_set_is_reported() {
        let validator = JwtTokenValidator::new(
            HOST_APP_ID,
            KeySource::Jwks("http://127.0.0.1:9/keys".to_string()),
            reqwest::Client::new(),
        );

        let err = validator
            .validate(Some(&sign_rs256("key-1", &skill_claims())))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::KeySetUnavailable { .. }));
    }

    #[tokio::test]
    async fn disabled_validator_is_anonymous() {
        let claims = DisabledTokenValidator.validate(Some("ignored")).await.unwrap();
        assert!(claims.is_anonymous());
    }
}
