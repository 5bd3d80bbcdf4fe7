//! Explicit assembly of the host from its configuration.

use crate::adapter::{BotAdapter, CloudAdapter};
use crate::bot::HostBot;
use crate::config::{ServerConfig, StorageBackend};
use crate::connector::HttpChannelConnector;
use crate::db::{PgSkillConversationStore, PgStateStorage};
use crate::error::StartupError;
use crate::skill_handler::SkillHandler;
use rootcause::prelude::Report;
use skillgate_auth::{
    AllowedSkillsClaimsValidator, AppCredentials, CHANNEL_TOKEN_ISSUER, DisabledTokenValidator,
    GOVERNMENT_CHANNEL_TOKEN_ISSUER, JwtTokenValidator, KeySource, TokenValidator,
};
use skillgate_conversation::{
    ConversationIdFactory, MemorySkillConversationStore, MemoryStateStorage,
    SkillConversationIdFactory, SkillConversationStore, StateStorage,
};
use skillgate_skills::{NoAuthTokenProvider, OAuthTokenProvider, SkillHttpClient, TokenProvider};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runs turns for channel activities.
    pub adapter: Arc<CloudAdapter>,
    /// Validates tokens on `/api/messages`.
    pub channel_validator: Arc<dyn TokenValidator>,
    /// Serves skill callbacks.
    pub skill_handler: Arc<SkillHandler>,
}

/// Where skill conversation ids and conversation state live.
pub struct Storage {
    pub conversations: Arc<dyn SkillConversationStore>,
    pub state: Arc<dyn StateStorage>,
}

impl Storage {
    /// In-process storage, lost on restart.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            conversations: Arc::new(MemorySkillConversationStore::new()),
            state: Arc::new(MemoryStateStorage::new()),
        }
    }

    /// Opens the configured backend, running migrations for Postgres.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or migrated.
    pub async fn open(config: &ServerConfig) -> Result<Self, Report<StartupError>> {
        match config.storage {
            StorageBackend::Memory => Ok(Self::memory()),
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| StartupError::Config {
                        reason: "database_url is required for postgres storage".to_string(),
                    })?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(url)
                    .await
                    .map_err(|e| StartupError::Database {
                        reason: e.to_string(),
                    })?;

                info!("running database migrations");
                sqlx::migrate!("./migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| StartupError::Migration {
                        reason: e.to_string(),
                    })?;

                Ok(Self {
                    conversations: Arc::new(PgSkillConversationStore::new(pool.clone())),
                    state: Arc::new(PgStateStorage::new(pool)),
                })
            }
        }
    }
}

/// Builds every component from configuration.
///
/// # Errors
///
/// Returns an error if the HTTP client or the token provider cannot be built.
pub fn build(config: &ServerConfig, storage: Storage) -> Result<AppState, Report<StartupError>> {
    let http = reqwest::Client::builder()
        .timeout(config.skill_timeout())
        .build()
        .map_err(|e| StartupError::Component {
            component: "http client",
            reason: e.to_string(),
        })?;

    let credentials = config.credentials();
    let tokens: Arc<dyn TokenProvider> = if credentials.is_auth_disabled() {
        info!("no app id configured; authentication is disabled");
        Arc::new(NoAuthTokenProvider)
    } else {
        let provider = OAuthTokenProvider::new(
            credentials.app_id().to_string(),
            credentials.password().to_string(),
            &credentials.token_endpoint(),
            http.clone(),
            config.retry,
        )
        .map_err(|e| StartupError::Component {
            component: "token provider",
            reason: e.to_string(),
        })?;
        Arc::new(provider)
    };

    let mut id_factory = SkillConversationIdFactory::new(storage.conversations);
    if let Some(ttl) = config.skill_conversation_ttl() {
        id_factory = id_factory.with_ttl(ttl);
    }
    let id_factory: Arc<dyn ConversationIdFactory> = Arc::new(id_factory);

    let skills = config.skills_configuration();
    info!(skills = skills.len(), "configured skills");
    let skill_client = SkillHttpClient::new(
        http.clone(),
        Arc::clone(&tokens),
        Arc::clone(&id_factory),
        credentials.app_id(),
        skills.skill_host_endpoint(),
    )
    .with_retry(config.retry);

    let connector = Arc::new(HttpChannelConnector::new(http.clone(), tokens));
    let bot = Arc::new(HostBot::new(skills, Arc::clone(&id_factory)));
    let adapter = Arc::new(CloudAdapter::new(
        bot,
        connector,
        skill_client,
        storage.state,
        credentials.channel_oauth_scope(),
    ));

    let (channel_validator, skill_validator) = token_validators(config, &credentials, &http);
    let claims_validator = Arc::new(AllowedSkillsClaimsValidator::new(config.allowed_callers()));
    let skill_handler = Arc::new(SkillHandler::new(
        Arc::clone(&adapter) as Arc<dyn BotAdapter>,
        id_factory,
        skill_validator,
        claims_validator,
    ));

    Ok(AppState {
        adapter,
        channel_validator,
        skill_handler,
    })
}

/// Returns the validators for channel tokens and skill tokens.
fn token_validators(
    config: &ServerConfig,
    credentials: &AppCredentials,
    http: &reqwest::Client,
) -> (Arc<dyn TokenValidator>, Arc<dyn TokenValidator>) {
    if credentials.is_auth_disabled() {
        return (Arc::new(DisabledTokenValidator), Arc::new(DisabledTokenValidator));
    }

    let audience = credentials.app_id();
    let overridden = |source: KeySource| {
        let channel = JwtTokenValidator::new(audience, source.clone(), http.clone());
        let skill = JwtTokenValidator::new(audience, source, http.clone()).require_app_id();
        (channel, skill)
    };

    let auth = &config.auth;
    let (channel, skill) = if let Some(secret) = &auth.signing_secret {
        overridden(KeySource::Secret(secret.as_bytes().to_vec()))
    } else if let Some(url) = &auth.jwks_url {
        overridden(KeySource::Jwks(url.clone()))
    } else if let Some(url) = &auth.openid_metadata_url {
        overridden(KeySource::OpenIdMetadata(url.clone()))
    } else {
        let issuer = if credentials.is_government() {
            GOVERNMENT_CHANNEL_TOKEN_ISSUER
        } else {
            CHANNEL_TOKEN_ISSUER
        };
        let channel = JwtTokenValidator::new(
            audience,
            KeySource::OpenIdMetadata(credentials.openid_metadata_url().to_string()),
            http.clone(),
        )
        .with_issuers(vec![issuer.to_string()]);
        let skill = JwtTokenValidator::new(
            audience,
            KeySource::OpenIdMetadata(credentials.skill_openid_metadata_url().to_string()),
            http.clone(),
        )
        .require_app_id();
        (channel, skill)
    };

    (Arc::new(channel), Arc::new(skill))
}
