//! Core types shared across the skillgate workspace.
//!
//! This crate provides the foundational identifier types and the error
//! handling alias used by the skill routing layer and the host server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ActivityId, ParseIdError, SkillConversationId};
