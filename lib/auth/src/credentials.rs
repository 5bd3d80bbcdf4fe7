//! The host's own app credentials and the cloud endpoints they imply.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `channel_service` value selecting the government cloud.
pub const GOVERNMENT_CHANNEL_SERVICE: &str = "https://botframework.azure.us";

const TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token";
const GOVERNMENT_TOKEN_ENDPOINT: &str =
    "https://login.microsoftonline.us/MicrosoftServices.onmicrosoft.com/oauth2/v2.0/token";
const TENANT_TOKEN_ENDPOINT: &str = "https://login.microsoftonline.com";

const CHANNEL_OAUTH_SCOPE: &str = "https://api.botframework.com";
const GOVERNMENT_CHANNEL_OAUTH_SCOPE: &str = "https://api.botframework.us";

const OPENID_METADATA_URL: &str =
    "https://login.botframework.com/v1/.well-known/openidconfiguration";
const GOVERNMENT_OPENID_METADATA_URL: &str =
    "https://login.botframework.azure.us/v1/.well-known/openidconfiguration";

const SKILL_OPENID_METADATA_URL: &str =
    "https://login.microsoftonline.com/botframework.com/v2.0/.well-known/openid-configuration";
const GOVERNMENT_SKILL_OPENID_METADATA_URL: &str = "https://login.microsoftonline.us/cab8a31a-1906-4287-a0d8-4eef66b95f6e/v2.0/.well-known/openid-configuration";

/// The host's app registration.
///
/// An empty app id disables authentication: inbound tokens are not checked
/// and outbound calls carry no token.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppCredentials {
    app_id: String,
    #[serde(skip_serializing)]
    password: String,
    tenant_id: Option<String>,
    channel_service: Option<String>,
}

impl AppCredentials {
    /// Creates credentials for the public cloud.
    #[must_use]
    pub fn new(app_id: String, password: String) -> Self {
        Self {
            app_id,
            password,
            tenant_id: None,
            channel_service: None,
        }
    }

    /// Creates a builder for tenant or cloud customization.
    #[must_use]
    pub fn builder(app_id: String, password: String) -> AppCredentialsBuilder {
        AppCredentialsBuilder::new(app_id, password)
    }

    /// Returns the host's app id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the host's app password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Returns the tenant id for single-tenant registrations.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns true if no app id is configured.
    #[must_use]
    pub fn is_auth_disabled(&self) -> bool {
        self.app_id.is_empty()
    }

    /// Returns true if the government cloud is selected.
    #[must_use]
    pub fn is_government(&self) -> bool {
        self.channel_service
            .as_deref()
            .is_some_and(|service| service.eq_ignore_ascii_case(GOVERNMENT_CHANNEL_SERVICE))
    }

    /// Returns the OAuth2 token endpoint for client-credentials grants.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        if self.is_government() {
            return GOVERNMENT_TOKEN_ENDPOINT.to_string();
        }
        match self.tenant_id.as_deref() {
            Some(tenant) if !tenant.is_empty() => {
                format!("{TENANT_TOKEN_ENDPOINT}/{tenant}/oauth2/v2.0/token")
            }
            _ => TOKEN_ENDPOINT.to_string(),
        }
    }

    /// Returns the OAuth scope for replying to a channel.
    #[must_use]
    pub fn channel_oauth_scope(&self) -> &'static str {
        if self.is_government() {
            GOVERNMENT_CHANNEL_OAUTH_SCOPE
        } else {
            CHANNEL_OAUTH_SCOPE
        }
    }

    /// Returns the OpenID metadata URL for validating channel tokens.
    #[must_use]
    pub fn openid_metadata_url(&self) -> &'static str {
        if self.is_government() {
            GOVERNMENT_OPENID_METADATA_URL
        } else {
            OPENID_METADATA_URL
        }
    }

    /// Returns the OpenID metadata URL for validating tokens minted for skills.
    #[must_use]
    pub fn skill_openid_metadata_url(&self) -> &'static str {
        if self.is_government() {
            GOVERNMENT_SKILL_OPENID_METADATA_URL
        } else {
            SKILL_OPENID_METADATA_URL
        }
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("password", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("channel_service", &self.channel_service)
            .finish()
    }
}

/// Returns the `.default` scope requesting a token for `resource`.
#[must_use]
pub fn default_scope(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

/// Builder for `AppCredentials`.
#[derive(Debug)]
pub struct AppCredentialsBuilder {
    app_id: String,
    password: String,
    tenant_id: Option<String>,
    channel_service: Option<String>,
}

impl AppCredentialsBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(app_id: String, password: String) -> Self {
        Self {
            app_id,
            password,
            tenant_id: None,
            channel_service: None,
        }
    }

    /// Sets the tenant for single-tenant registrations.
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id.filter(|t| !t.is_empty());
        self
    }

    /// Sets the channel service, selecting the cloud.
    #[must_use]
    pub fn channel_service(mut self, channel_service: Option<String>) -> Self {
        self.channel_service = channel_service.filter(|s| !s.is_empty());
        self
    }

    /// Builds the credentials.
    #[must_use]
    pub fn build(self) -> AppCredentials {
        AppCredentials {
            app_id: self.app_id,
            password: self.password,
            tenant_id: self.tenant_id,
            channel_service: self.channel_service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_cloud_endpoints() {
        let creds = AppCredentials::new("host".to_string(), "secret".to_string());
        assert!(!creds.is_auth_disabled());
        assert!(!creds.is_government());
        assert_eq!(creds.token_endpoint(), TOKEN_ENDPOINT);
        assert_eq!(creds.channel_oauth_scope(), "https://api.botframework.com");
    }

    #[test]
    fn tenant_endpoint() {
        let creds = AppCredentials::builder("host".to_string(), "secret".to_string())
            .tenant_id(Some("contoso".to_string()))
            .build();
        assert_eq!(
            creds.token_endpoint(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn government_cloud_endpoints() {
        let creds = AppCredentials::builder("host".to_string(), "secret".to_string())
            .channel_service(Some(GOVERNMENT_CHANNEL_SERVICE.to_string()))
            .build();
        assert!(creds.is_government());
        assert_eq!(creds.token_endpoint(), GOVERNMENT_TOKEN_ENDPOINT);
        assert_eq!(creds.channel_oauth_scope(), "https://api.botframework.us");
        assert!(creds.openid_metadata_url().contains("azure.us"));
    }

    #[test]
    fn empty_app_id_disables_auth() {
        assert!(AppCredentials::default().is_auth_disabled());
    }

    #[test]
    fn debug_redacts_password() {
        let creds = AppCredentials::new("host".to_string(), "hunter2".to_string());
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn default_scope_format() {
        assert_eq!(default_scope("skill-app/"), "skill-app/.default");
        assert_eq!(
            default_scope("https://api.botframework.com"),
            "https://api.botframework.com/.default"
        );
    }
}
