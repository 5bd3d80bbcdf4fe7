//! Caller authorization for skill callbacks.

use crate::claims::Claims;
use crate::error::AuthorizationError;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Allow-list entry admitting every caller.
pub const ALLOW_ANY_CALLER: &str = "*";

/// Decides whether an authenticated caller may proceed.
pub trait ClaimsValidator: Send + Sync {
    /// Returns `Ok` if the caller described by `claims` is allowed.
    ///
    /// # Errors
    ///
    /// Returns an `AuthorizationError` if the caller is not allowed.
    fn validate(&self, claims: &Claims) -> Result<(), AuthorizationError>;
}

/// Admits skills whose app id is on a fixed allow-list.
///
/// An empty list, or one containing `*`, admits any caller that presents an
/// app id.
#[derive(Debug, Clone, Default)]
pub struct AllowedSkillsClaimsValidator {
    allowed: BTreeSet<String>,
    allow_any: bool,
}

impl AllowedSkillsClaimsValidator {
    /// Creates a validator over the given caller app ids.
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = String>) -> Self {
        let allowed: BTreeSet<String> = allowed
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        let allow_any = allowed.is_empty() || allowed.contains(ALLOW_ANY_CALLER);

        if allowed.is_empty() {
            warn!("no allowed callers configured; any skill may call back into this host");
        } else if allow_any {
            warn!("allowed callers contains '*'; any skill may call back into this host");
        } else {
            debug!(callers = ?allowed, "allowed callers configured");
        }

        Self { allowed, allow_any }
    }

    /// Returns true if any caller with an app id is admitted.
    #[must_use]
    pub fn allows_any(&self) -> bool {
        self.allow_any
    }

    /// Returns the configured caller app ids.
    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl ClaimsValidator for AllowedSkillsClaimsValidator {
    fn validate(&self, claims: &Claims) -> Result<(), AuthorizationError> {
        let Some(app_id) = claims.app_id() else {
            warn!(security_event = true, "rejected skill callback without an app id");
            return Err(AuthorizationError::MissingAppId);
        };

        if self.allow_any || self.allowed.contains(app_id) {
            return Ok(());
        }

        warn!(
            security_event = true,
            caller_app_id = app_id,
            "rejected skill callback from caller not in the allow-list"
        );
        Err(AuthorizationError::CallerNotAllowed {
            app_id: app_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(app_id: &str) -> Claims {
        Claims {
            aud: Some("host-app".to_string()),
            appid: Some(app_id.to_string()),
            ver: Some("1.0".to_string()),
            ..Claims::default()
        }
    }

    fn validator(ids: &[&str]) -> AllowedSkillsClaimsValidator {
        AllowedSkillsClaimsValidator::new(ids.iter().map(|id| (*id).to_string()))
    }

    #[test]
    fn empty_list_accepts_any_skill() {
        let validator = validator(&[]);
        assert!(validator.allows_any());
        for id in ["skill-1", "skill-2", "anything"] {
            assert!(validator.validate(&caller(id)).is_ok());
        }
    }

    #[test]
    fn members_are_accepted() {
        let validator = validator(&["skill-1", "skill-3"]);
        assert!(validator.validate(&caller("skill-1")).is_ok());
        assert!(validator.validate(&caller("skill-3")).is_ok());
    }

    #[test]
    fn outsiders_are_forbidden() {
        let validator = validator(&["skill-1"]);
        assert_eq!(
            validator.validate(&caller("skill-2")),
            Err(AuthorizationError::CallerNotAllowed {
                app_id: "skill-2".to_string()
            })
        );
    }

    #[test]
    fn missing_app_id_is_forbidden_even_when_permissive() {
        let validator = validator(&[]);
        assert_eq!(
            validator.validate(&Claims::anonymous()),
            Err(AuthorizationError::MissingAppId)
        );
    }

    #[test]
    fn wildcard_accepts_any_skill() {
        let validator = validator(&["skill-1", "*"]);
        assert!(validator.allows_any());
        assert!(validator.validate(&caller("skill-9")).is_ok());
    }

    #[test]
    fn blank_entries_are_ignored() {
        let validator = validator(&["  ", ""]);
        assert!(validator.allows_any());
        assert_eq!(validator.allowed().count(), 0);
    }

    #[test]
    fn matching_is_exact() {
        let validator = validator(&["skill-1"]);
        assert!(validator.validate(&caller("SKILL-1")).is_err());
        assert!(validator.validate(&caller("skill-10")).is_err());
    }
}
