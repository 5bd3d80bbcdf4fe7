//! Authentication and caller authorization for skillgate.
//!
//! This crate provides:
//! - The host's app credentials and the cloud endpoints they select
//! - Claims extracted from bearer tokens, with skill-claim detection
//! - JWT validation against a shared secret or a remote key set
//! - The allow-list gate for skills calling back into the host
//!
//! # Example
//!
//! ```
//! use skillgate_auth::{AllowedSkillsClaimsValidator, Claims, ClaimsValidator};
//!
//! let validator = AllowedSkillsClaimsValidator::new(vec!["skill-1".to_string()]);
//!
//! let claims = Claims {
//!     aud: Some("host-app".to_string()),
//!     appid: Some("skill-1".to_string()),
//!     ver: Some("1.0".to_string()),
//!     ..Claims::default()
//! };
//! assert!(validator.validate(&claims).is_ok());
//! ```

pub mod allowed;
pub mod claims;
pub mod credentials;
pub mod error;
pub mod validation;

pub use allowed::{ALLOW_ANY_CALLER, AllowedSkillsClaimsValidator, ClaimsValidator};
pub use claims::{
    ANONYMOUS_SKILL_APP_ID, CALLER_ID_PREFIX, CHANNEL_TOKEN_ISSUER, Claims,
    GOVERNMENT_CHANNEL_TOKEN_ISSUER,
};
pub use credentials::{
    AppCredentials, AppCredentialsBuilder, GOVERNMENT_CHANNEL_SERVICE, default_scope,
};
pub use error::{AuthenticationError, AuthorizationError};
pub use validation::{DisabledTokenValidator, JwtTokenValidator, KeySource, TokenValidator};
