//! Domain error types for server operations.
//!
//! Each layer has its own enum; `ApiError` is the single place where they
//! become HTTP responses with user-safe messages.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::prelude::Report;
use serde_json::json;
use skillgate_auth::{AuthenticationError, AuthorizationError};
use skillgate_conversation::{ConversationIdError, StoreError};
use skillgate_skills::{AuthError, SkillClientError};
use std::fmt;
use tracing::{error, warn};

/// Errors talking to a channel's connector service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// The activity lacks the addressing needed to send it.
    InvalidActivity { reason: String },
    /// No token could be obtained for the channel.
    Auth(AuthError),
    /// The channel could not be reached.
    Unreachable { url: String, reason: String },
    /// The channel answered with a non-success status.
    Rejected { url: String, status: u16 },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidActivity { reason } => write!(f, "cannot address activity: {reason}"),
            Self::Auth(err) => write!(f, "channel authentication failed: {err}"),
            Self::Unreachable { url, reason } => {
                write!(f, "channel at '{url}' is unreachable: {reason}")
            }
            Self::Rejected { url, status } => {
                write!(f, "channel at '{url}' rejected the request with status {status}")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<AuthError> for ConnectorError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

/// Errors while running a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// The inbound activity cannot be processed.
    InvalidActivity { reason: String },
    /// Conversation state could not be loaded or saved.
    State(StoreError),
    /// A state property could not be encoded.
    StateEncoding { key: String, reason: String },
    /// Sending to the channel failed.
    Channel(ConnectorError),
    /// Delegating to a skill failed.
    Skill(SkillClientError),
    /// Skill conversation ids could not be managed.
    ConversationId(ConversationIdError),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidActivity { reason } => write!(f, "invalid activity: {reason}"),
            Self::State(err) => write!(f, "conversation state: {err}"),
            Self::StateEncoding { key, reason } => {
                write!(f, "cannot encode state property '{key}': {reason}")
            }
            Self::Channel(err) => write!(f, "{err}"),
            Self::Skill(err) => write!(f, "{err}"),
            Self::ConversationId(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for TurnError {}

impl From<StoreError> for TurnError {
    fn from(err: StoreError) -> Self {
        Self::State(err)
    }
}

impl From<ConnectorError> for TurnError {
    fn from(err: ConnectorError) -> Self {
        Self::Channel(err)
    }
}

impl From<SkillClientError> for TurnError {
    fn from(err: SkillClientError) -> Self {
        Self::Skill(err)
    }
}

impl From<ConversationIdError> for TurnError {
    fn from(err: ConversationIdError) -> Self {
        Self::ConversationId(err)
    }
}

/// Errors from the skill callback handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillHandlerError {
    /// The bearer token was missing or invalid.
    Unauthorized(AuthenticationError),
    /// The caller is not allowed to call back into the host.
    Forbidden(AuthorizationError),
    /// The skill conversation id does not resolve.
    NotFound { skill_conversation_id: String },
    /// The skill's activity could not be delivered to the host conversation.
    Delivery {
        skill_conversation_id: String,
        activity_id: Option<String>,
        activity_type: String,
        service_url: String,
        reason: String,
    },
    /// The skill conversation store failed.
    Lookup(ConversationIdError),
    /// The channel-service operation is not supported.
    NotImplemented { operation: String },
}

impl fmt::Display for SkillHandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(err) => write!(f, "unauthorized: {err}"),
            Self::Forbidden(err) => write!(f, "forbidden: {err}"),
            Self::NotFound {
                skill_conversation_id,
            } => write!(f, "unknown skill conversation '{skill_conversation_id}'"),
            Self::Delivery {
                skill_conversation_id,
                activity_id,
                activity_type,
                service_url,
                reason,
            } => write!(
                f,
                "failed to deliver {activity_type} activity {} from skill conversation \
                 '{skill_conversation_id}' to {service_url}: {reason}",
                activity_id.as_deref().unwrap_or("<none>")
            ),
            Self::Lookup(err) => write!(f, "skill conversation lookup failed: {err}"),
            Self::NotImplemented { operation } => write!(f, "{operation} is not implemented"),
        }
    }
}

impl std::error::Error for SkillHandlerError {}

/// Errors during startup.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { reason: String },
    /// The database could not be reached.
    Database { reason: String },
    /// Database migrations failed.
    Migration { reason: String },
    /// An outbound component could not be built.
    Component { component: &'static str, reason: String },
    /// The listener could not be bound.
    Bind { addr: String, reason: String },
    /// The server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Database { reason } => write!(f, "failed to connect to database: {reason}"),
            Self::Migration { reason } => write!(f, "failed to run migrations: {reason}"),
            Self::Component { component, reason } => {
                write!(f, "failed to build {component}: {reason}")
            }
            Self::Bind { addr, reason } => write!(f, "failed to bind to {addr}: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// An error rendered as `{ "error": { "code": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Creates an error response.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// A malformed request body.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// A request body larger than the host accepts.
    #[must_use]
    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            format!("request body exceeds {limit} bytes"),
        )
    }

    /// A channel-service operation the host does not support.
    #[must_use]
    pub fn not_implemented(operation: &str) -> Self {
        Self::new(
            StatusCode::NOT_IMPLEMENTED,
            "not_implemented",
            format!("{operation} is not implemented"),
        )
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(err: AuthenticationError) -> Self {
        warn!(error = %err, "request authentication failed");
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection, "malformed activity");
        Self::bad_request(rejection.body_text())
    }
}

impl From<Report<TurnError>> for ApiError {
    fn from(report: Report<TurnError>) -> Self {
        match report.current_context() {
            TurnError::InvalidActivity { reason } => {
                warn!(%reason, "rejected activity");
                Self::bad_request(reason.clone())
            }
            TurnError::Channel(_) | TurnError::Skill(_) => {
                error!(error = %report, "turn failed upstream");
                Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", "upstream request failed")
            }
            _ => {
                error!(error = %report, "turn failed");
                Self::internal()
            }
        }
    }
}

impl From<Report<SkillHandlerError>> for ApiError {
    fn from(report: Report<SkillHandlerError>) -> Self {
        match report.current_context() {
            SkillHandlerError::Unauthorized(err) => {
                warn!(error = %err, "skill callback authentication failed");
                Self::new(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
            }
            SkillHandlerError::Forbidden(_) => Self::new(
                StatusCode::FORBIDDEN,
                "forbidden",
                "caller is not allowed to call this host",
            ),
            SkillHandlerError::NotFound {
                skill_conversation_id,
            } => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("conversation '{skill_conversation_id}' not found"),
            ),
            SkillHandlerError::Delivery { .. } => Self::new(
                StatusCode::BAD_GATEWAY,
                "delivery_failed",
                "activity could not be delivered to the conversation",
            ),
            SkillHandlerError::NotImplemented { operation } => Self::not_implemented(operation),
            SkillHandlerError::Lookup(_) => {
                error!(error = %report, "skill conversation lookup failed");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
