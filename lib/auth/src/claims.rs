//! Claims carried by a verified bearer token.

use crate::error::AuthenticationError;
use serde::{Deserialize, Serialize};

/// App id given to callers when authentication is disabled.
pub const ANONYMOUS_SKILL_APP_ID: &str = "AnonymousSkill";

/// Prefix of the `callerId` stamped on activities that arrive from a skill.
pub const CALLER_ID_PREFIX: &str = "urn:botframework:aadappid:";

/// Issuer (and audience) of tokens the channel service sends to bots.
pub const CHANNEL_TOKEN_ISSUER: &str = "https://api.botframework.com";

/// Issuer of channel tokens in the government cloud.
pub const GOVERNMENT_CHANNEL_TOKEN_ISSUER: &str = "https://api.botframework.us";

/// Claims extracted from a validated token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Audience: the app id the token was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Calling app id in v1.0 tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,
    /// Calling app id in v2.0 tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Token version, `1.0` or `2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ver: Option<String>,
    /// Tenant id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Service URL the channel asserts for the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serviceurl: Option<String>,
    /// Expiry, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not-before, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl Claims {
    /// Claims for a request that was not authenticated.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Claims standing in for a skill when authentication is disabled.
    #[must_use]
    pub fn anonymous_skill() -> Self {
        Self {
            appid: Some(ANONYMOUS_SKILL_APP_ID.to_string()),
            ver: Some("1.0".to_string()),
            ..Self::default()
        }
    }

    /// Returns true if no identity was established.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.aud.is_none() && self.app_id().is_none()
    }

    /// Returns the calling app id.
    ///
    /// v1.0 tokens carry it in `appid`, v2.0 tokens in `azp`.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        let app_id = match self.ver.as_deref() {
            Some("2.0") => self.azp.as_deref(),
            _ => self.appid.as_deref(),
        };
        app_id.filter(|id| !id.is_empty())
    }

    /// Returns true if these claims identify one bot calling another.
    ///
    /// Channel tokens are addressed from the channel service; skill tokens
    /// carry a version and an app id different from their audience.
    #[must_use]
    pub fn is_skill_claim(&self) -> bool {
        if self.app_id() == Some(ANONYMOUS_SKILL_APP_ID) {
            return true;
        }
        if self.ver.is_none() {
            return false;
        }
        let audience = self.aud.as_deref();
        if matches!(
            audience,
            Some(CHANNEL_TOKEN_ISSUER | GOVERNMENT_CHANNEL_TOKEN_ISSUER)
        ) {
            return false;
        }
        match self.app_id() {
            Some(app_id) => audience != Some(app_id),
            None => false,
        }
    }

    /// Checks that the activity is addressed to the service URL the token was
    /// issued for.
    ///
    /// Tokens without a `serviceurl` claim place no constraint. URLs compare
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `ServiceUrlMismatch` if the claim is present and differs.
    pub fn verify_service_url(&self, service_url: Option<&str>) -> Result<(), AuthenticationError> {
        let Some(claimed) = self.serviceurl.as_deref() else {
            return Ok(());
        };
        match service_url {
            Some(actual) if actual.eq_ignore_ascii_case(claimed) => Ok(()),
            actual => Err(AuthenticationError::ServiceUrlMismatch {
                claimed: claimed.to_string(),
                actual: actual.map(str::to_string),
            }),
        }
    }

    /// Returns the `callerId` to stamp on activities sent by this caller.
    #[must_use]
    pub fn caller_id(&self) -> Option<String> {
        self.app_id().map(|app_id| format!("{CALLER_ID_PREFIX}{app_id}"))
    }
}
