//! Outbound bearer tokens.
//!
//! The host authenticates to skills and channels with OAuth2 client
//! credentials. Tokens are cached per scope and refreshed shortly before they
//! expire.

use crate::error::AuthError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{AuthType, ClientId, ClientSecret, RequestTokenError, Scope, TokenResponse, TokenUrl};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// A bearer token and when it stops being usable.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// Creates a token valid for `lifetime`, or indefinitely if `None`.
    #[must_use]
    pub fn new(secret: impl Into<String>, lifetime: Option<Duration>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: lifetime.map(|lifetime| Instant::now() + lifetime),
        }
    }

    /// Returns the raw token for the `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Returns true if the token should be refreshed before use.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() + REFRESH_MARGIN >= expires_at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of outbound bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token for `scope`.
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError>;

    /// Returns false if requests should be sent without a token.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Provider for hosts without credentials. Every request goes out anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthTokenProvider;

#[async_trait]
impl TokenProvider for NoAuthTokenProvider {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, AuthError> {
        Err(AuthError::NotConfigured)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// OAuth2 client-credentials provider.
pub struct OAuthTokenProvider {
    client_id: String,
    client_secret: String,
    token_url: TokenUrl,
    http: reqwest::Client,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, AccessToken>>,
}

impl OAuthTokenProvider {
    /// Creates a provider requesting tokens from `token_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `token_url` is not a valid URL.
    pub fn new(
        client_id: String,
        client_secret: String,
        token_url: &str,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<Self, AuthError> {
        let token_url =
            TokenUrl::new(token_url.to_string()).map_err(|e| AuthError::InvalidTokenEndpoint {
                url: token_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client_id,
            client_secret,
            token_url,
            http,
            retry,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn request_token(&self, scope: &str) -> Result<AccessToken, TokenAttemptError> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(self.token_url.clone());

        let response = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| match err {
                RequestTokenError::ServerResponse(response) => {
                    TokenAttemptError::Rejected(response.to_string())
                }
                other => TokenAttemptError::Transient(other.to_string()),
            })?;

        Ok(AccessToken::new(
            response.access_token().secret().clone(),
            response.expires_in(),
        ))
    }
}

enum TokenAttemptError {
    Rejected(String),
    Transient(String),
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, AuthError> {
        {
            let cache = self.cache.lock().await;
            if let Some(token) = cache.get(scope).filter(|token| !token.needs_refresh()) {
                return Ok(token.clone());
            }
        }

        let token = self
            .retry
            .retry(
                |attempt| {
                    debug!(attempt, "requesting token");
                    self.request_token(scope)
                },
                |err| matches!(err, TokenAttemptError::Transient(_)),
            )
            .await
            .map_err(|err| match err {
                TokenAttemptError::Rejected(reason) => {
                    warn!(%reason, "token request rejected");
                    AuthError::TokenRejected { reason }
                }
                TokenAttemptError::Transient(reason) => {
                    warn!(%reason, "token endpoint unavailable");
                    AuthError::TokenEndpointUnavailable {
                        attempts: self.retry.attempts(),
                        reason,
                    }
                }
            })?;

        self.cache
            .lock()
            .await
            .insert(scope.to_string(), token.clone());
        Ok(token)
    }
}
