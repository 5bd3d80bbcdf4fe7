//! Error types for the auth crate.
//!
//! - `AuthenticationError`: the caller's bearer token could not be verified
//! - `AuthorizationError`: the caller is known but not allowed

use std::fmt;

/// Errors from verifying a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// No `Authorization` header was sent.
    MissingToken,
    /// Token could not be decoded or its signature did not verify.
    InvalidToken { reason: String },
    /// Token has expired or is not yet valid.
    TokenExpired,
    /// Token was issued for another audience.
    InvalidAudience,
    /// Token was issued by an untrusted issuer.
    InvalidIssuer,
    /// Token is signed with a key the host does not know.
    UnknownSigningKey { kid: Option<String> },
    /// Signing keys could not be fetched.
    KeySetUnavailable { reason: String },
    /// A required claim is missing.
    MissingClaim { claim: String },
    /// The token's `serviceurl` claim names another service than the activity.
    ServiceUrlMismatch {
        claimed: String,
        actual: Option<String>,
    },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "no bearer token was supplied"),
            Self::InvalidToken { reason } => write!(f, "invalid token: {reason}"),
            Self::TokenExpired => write!(f, "token has expired"),
            Self::InvalidAudience => write!(f, "token audience does not match this host"),
            Self::InvalidIssuer => write!(f, "token issuer is not trusted"),
            Self::UnknownSigningKey { kid } => match kid {
                Some(kid) => write!(f, "unknown signing key: {kid}"),
                None => write!(f, "token does not name its signing key"),
            },
            Self::KeySetUnavailable { reason } => {
                write!(f, "signing keys unavailable: {reason}")
            }
            Self::MissingClaim { claim } => write!(f, "missing required claim: {claim}"),
            Self::ServiceUrlMismatch { claimed, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "token is for service URL '{claimed}' but the activity names '{actual}'"
                ),
                None => write!(
                    f,
                    "token is for service URL '{claimed}' but the activity names none"
                ),
            },
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Errors from checking whether a verified caller may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The claims carry no app id.
    MissingAppId,
    /// The caller's app id is not on the allow-list.
    CallerNotAllowed { app_id: String },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAppId => write!(f, "caller did not present an app id"),
            Self::CallerNotAllowed { app_id } => {
                write!(f, "caller '{app_id}' is not in the list of allowed callers")
            }
        }
    }
}

impl std::error::Error for AuthorizationError {}
