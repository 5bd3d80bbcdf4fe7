//! Centralized server configuration.
//!
//! Configuration is loaded once at startup via the `config` crate from
//! environment variables, using `__` to separate nested keys:
//!
//! ```text
//! MICROSOFT_APP_ID=...
//! SKILL_HOST_ENDPOINT=https://host.example.com/api/skills
//! SKILLS__ECHO__APP_ID=...
//! SKILLS__ECHO__ENDPOINT=https://echo.example.com/api/messages
//! ALLOWED_CALLERS=app-a,app-b
//! RETRY__MAX_ATTEMPTS=4
//! ```

use serde::Deserialize;
use skillgate_auth::AppCredentials;
use skillgate_skills::{RetryPolicy, SkillDefinition, SkillsConfiguration};
use std::collections::BTreeMap;
use std::time::Duration;

/// Longest accepted skill conversation id lifetime: one hundred years.
const MAX_SKILL_CONVERSATION_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// The host bot's app id. Authentication is disabled when absent.
    #[serde(default)]
    pub microsoft_app_id: Option<String>,

    /// The host bot's app password.
    #[serde(default)]
    pub microsoft_app_password: Option<String>,

    /// Tenant for single-tenant bots.
    #[serde(default)]
    pub microsoft_app_tenant_id: Option<String>,

    /// Channel service; set to the government cloud URL to use its endpoints.
    #[serde(default)]
    pub channel_service: Option<String>,

    /// Callback base URL handed to skills as their `serviceUrl`.
    #[serde(default = "default_skill_host_endpoint")]
    pub skill_host_endpoint: String,

    /// Skills the host may delegate to, keyed by skill id.
    #[serde(default)]
    pub skills: BTreeMap<String, SkillConfig>,

    /// Extra app ids allowed to call back into the host.
    #[serde(default)]
    pub allowed_callers: Vec<String>,

    /// Where skill conversation ids and conversation state are kept.
    #[serde(default)]
    pub storage: StorageBackend,

    /// PostgreSQL connection URL, required for `postgres` storage.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Timeout for each outbound HTTP request, in seconds.
    #[serde(default = "default_skill_timeout_seconds")]
    pub skill_timeout_seconds: u64,

    /// Retry policy for token requests and transient skill failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Lifetime of skill conversation ids, in seconds. Ids never expire when unset.
    #[serde(default)]
    pub skill_conversation_ttl_seconds: Option<u64>,

    /// Inbound token validation overrides.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// A configured skill.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillConfig {
    /// The skill's app id.
    #[serde(default)]
    pub app_id: String,
    /// Where activities for the skill are posted.
    pub endpoint: String,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process storage, lost on restart.
    #[default]
    Memory,
    /// PostgreSQL.
    Postgres,
}

/// Overrides for where inbound token signing keys come from.
///
/// By default keys come from the Bot Framework OpenID metadata for the
/// configured cloud.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// OpenID metadata URL used for both channel and skill tokens.
    #[serde(default)]
    pub openid_metadata_url: Option<String>,
    /// JSON Web Key Set URL used for both channel and skill tokens.
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// HS256 shared secret, for development and tests.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3978".to_string()
}

fn default_skill_host_endpoint() -> String {
    "http://localhost:3978/api/skills".to_string()
}

fn default_skill_timeout_seconds() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            microsoft_app_id: None,
            microsoft_app_password: None,
            microsoft_app_tenant_id: None,
            channel_service: None,
            skill_host_endpoint: default_skill_host_endpoint(),
            skills: BTreeMap::new(),
            allowed_callers: Vec::new(),
            storage: StorageBackend::default(),
            database_url: None,
            skill_timeout_seconds: default_skill_timeout_seconds(),
            retry: RetryPolicy::default(),
            skill_conversation_ttl_seconds: None,
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(environment())
    }

    fn load(source: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.storage == StorageBackend::Postgres && self.database_url.is_none() {
            return Err(config::ConfigError::Message(
                "database_url is required for postgres storage".to_string(),
            ));
        }
        if self.is_auth_enabled() && self.microsoft_app_password.is_none() {
            return Err(config::ConfigError::Message(
                "microsoft_app_password is required when microsoft_app_id is set".to_string(),
            ));
        }
        if self
            .skill_conversation_ttl_seconds
            .is_some_and(|seconds| seconds > MAX_SKILL_CONVERSATION_TTL_SECONDS)
        {
            return Err(config::ConfigError::Message(format!(
                "skill_conversation_ttl_seconds must be at most {MAX_SKILL_CONVERSATION_TTL_SECONDS}"
            )));
        }
        for (id, skill) in &self.skills {
            if skill.endpoint.trim().is_empty() {
                return Err(config::ConfigError::Message(format!(
                    "skill '{id}' has no endpoint"
                )));
            }
        }
        Ok(())
    }

    /// Returns true if inbound tokens are validated and outbound tokens sent.
    #[must_use]
    pub fn is_auth_enabled(&self) -> bool {
        self.microsoft_app_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Returns the host's app credentials.
    #[must_use]
    pub fn credentials(&self) -> AppCredentials {
        AppCredentials::builder(
            self.microsoft_app_id.clone().unwrap_or_default(),
            self.microsoft_app_password.clone().unwrap_or_default(),
        )
        .tenant_id(self.microsoft_app_tenant_id.clone())
        .channel_service(self.channel_service.clone())
        .build()
    }

    /// Returns the configured skills.
    #[must_use]
    pub fn skills_configuration(&self) -> SkillsConfiguration {
        SkillsConfiguration::new(
            self.skill_host_endpoint.clone(),
            self.skills.iter().map(|(id, skill)| {
                SkillDefinition::new(id.clone(), skill.app_id.clone(), skill.endpoint.clone())
            }),
        )
    }

    /// Returns the app ids allowed to call back into the host: every
    /// configured skill plus the extra allowed callers.
    #[must_use]
    pub fn allowed_callers(&self) -> Vec<String> {
        let mut allowed = self.skills_configuration().app_ids();
        allowed.extend(self.allowed_callers.iter().cloned());
        allowed
    }

    /// Returns the per-request timeout for outbound calls.
    #[must_use]
    pub fn skill_timeout(&self) -> Duration {
        Duration::from_secs(self.skill_timeout_seconds)
    }

    /// Returns the lifetime of skill conversation ids, if they expire.
    ///
    /// A lifetime too large to represent means the ids never expire.
    #[must_use]
    pub fn skill_conversation_ttl(&self) -> Option<chrono::Duration> {
        self.skill_conversation_ttl_seconds
            .and_then(|seconds| i64::try_from(seconds).ok())
            .and_then(chrono::Duration::try_seconds)
    }
}

fn environment() -> config::Environment {
    config::Environment::default()
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("allowed_callers")
        .try_parsing(true)
}
