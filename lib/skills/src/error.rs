//! Error types for the skills crate.
//!
//! Client operations report these through `skillgate_core::Result`:
//! - `AuthError`: Outbound token acquisition failures
//! - `SkillClientError`: Failures posting an activity to a skill

use skillgate_conversation::ConversationIdError;
use std::fmt;

/// Errors from acquiring an outbound bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token endpoint URL is not valid.
    InvalidTokenEndpoint { url: String, reason: String },
    /// The token endpoint refused the credentials.
    TokenRejected { reason: String },
    /// The token endpoint could not be reached or answered with garbage.
    TokenEndpointUnavailable { attempts: u32, reason: String },
    /// The host has no credentials to request tokens with.
    NotConfigured,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTokenEndpoint { url, reason } => {
                write!(f, "invalid token endpoint '{url}': {reason}")
            }
            Self::TokenRejected { reason } => {
                write!(f, "token request rejected: {reason}")
            }
            Self::TokenEndpointUnavailable { attempts, reason } => {
                write!(
                    f,
                    "token endpoint unavailable after {attempts} attempt(s): {reason}"
                )
            }
            Self::NotConfigured => write!(f, "no credentials configured for outbound tokens"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Errors from posting an activity to a skill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillClientError {
    /// No token could be obtained for the skill.
    Auth(AuthError),
    /// The skill could not be reached.
    SkillUnreachable { skill_id: String, reason: String },
    /// The skill answered with a non-success status.
    SkillRejected {
        skill_id: String,
        status: u16,
        body: Option<String>,
    },
    /// The skill conversation id could not be created.
    ConversationId(ConversationIdError),
    /// No skill with this id is configured.
    UnknownSkill { skill_id: String },
}

impl fmt::Display for SkillClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "skill authentication failed: {err}"),
            Self::SkillUnreachable { skill_id, reason } => {
                write!(f, "skill '{skill_id}' is unreachable: {reason}")
            }
            Self::SkillRejected {
                skill_id, status, ..
            } => {
                write!(f, "skill '{skill_id}' rejected the activity with status {status}")
            }
            Self::ConversationId(err) => write!(f, "skill conversation id: {err}"),
            Self::UnknownSkill { skill_id } => write!(f, "unknown skill: {skill_id}"),
        }
    }
}

impl std::error::Error for SkillClientError {}

impl From<AuthError> for SkillClientError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<ConversationIdError> for SkillClientError {
    fn from(err: ConversationIdError) -> Self {
        Self::ConversationId(err)
    }
}
