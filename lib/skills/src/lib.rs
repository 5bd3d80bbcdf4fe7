//! Skill delegation for skillgate.
//!
//! This crate provides:
//! - **Skill configuration**: The skills a host may delegate to
//! - **Retry policy**: Bounded exponential backoff
//! - **Token providers**: OAuth2 client-credentials tokens, cached per scope
//! - **Skill client**: Posts activities to skills under their skill conversation id

pub mod client;
pub mod error;
pub mod retry;
pub mod skill;
pub mod token;

pub use client::{SkillHttpClient, SkillResponse};
pub use error::{AuthError, SkillClientError};
pub use retry::RetryPolicy;
pub use skill::{SkillDefinition, SkillsConfiguration};
pub use token::{AccessToken, NoAuthTokenProvider, OAuthTokenProvider, TokenProvider};
