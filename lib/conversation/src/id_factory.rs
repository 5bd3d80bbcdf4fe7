//! Skill conversation id factory.
//!
//! Maps a (host conversation, skill) pair to an opaque `SkillConversationId`
//! handed to the skill as its conversation id, and resolves that id back to
//! the host conversation when the skill calls back.
//!
//! Ids are random ULIDs, not derived from the conversation, so a skill cannot
//! forge an id for a conversation it was never given. Idempotency comes from
//! the store's natural-key index instead.

use crate::error::ConversationIdError;
use crate::reference::{ConversationKey, ConversationReference, SkillConversationReference};
use crate::store::{SkillConversationRecord, SkillConversationStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use skillgate_core::SkillConversationId;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Input used to derive or look up a skill conversation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillConversationIdFactoryOptions {
    /// The host conversation being delegated.
    pub conversation_reference: ConversationReference,
    /// The skill the conversation is delegated to.
    pub skill_id: String,
    /// OAuth scope to use when replying on the host conversation's channel.
    pub oauth_scope: String,
}

impl SkillConversationIdFactoryOptions {
    /// Creates options for delegating `conversation_reference` to `skill_id`.
    #[must_use]
    pub fn new(
        conversation_reference: ConversationReference,
        skill_id: impl Into<String>,
        oauth_scope: impl Into<String>,
    ) -> Self {
        Self {
            conversation_reference,
            skill_id: skill_id.into(),
            oauth_scope: oauth_scope.into(),
        }
    }

    /// Returns the uniqueness key: channel, conversation, service URL and skill.
    ///
    /// Components are length-prefixed so that no choice of values can make two
    /// distinct tuples collide.
    #[must_use]
    pub fn natural_key(&self) -> String {
        let reference = &self.conversation_reference;
        [
            reference.channel_id.as_str(),
            reference.conversation.id.as_str(),
            reference.service_url.as_str(),
            self.skill_id.as_str(),
        ]
        .iter()
        .map(|part| format!("{}:{part}", part.len()))
        .collect::<Vec<_>>()
        .join("|")
    }

    fn validate(&self) -> Result<(), ConversationIdError> {
        let reference = &self.conversation_reference;
        let missing = if reference.channel_id.is_empty() {
            Some("channel id")
        } else if reference.conversation.id.is_empty() {
            Some("conversation id")
        } else if reference.service_url.is_empty() {
            Some("service URL")
        } else if self.skill_id.is_empty() {
            Some("skill id")
        } else {
            None
        };

        match missing {
            Some(field) => Err(ConversationIdError::InvalidOptions {
                reason: format!("{field} is empty"),
            }),
            None => Ok(()),
        }
    }
}

/// Creates and resolves skill conversation ids.
#[async_trait]
pub trait ConversationIdFactory: Send + Sync {
    /// Returns the id for the given options, minting one on first use.
    ///
    /// Identical options yield the same id while the mapping is live.
    async fn create_skill_conversation_id(
        &self,
        options: &SkillConversationIdFactoryOptions,
    ) -> Result<SkillConversationId, ConversationIdError>;

    /// Resolves an id received from a skill.
    ///
    /// Fails with `NotFound` if the id is malformed, unknown or expired.
    async fn get_conversation_reference(
        &self,
        skill_conversation_id: &str,
    ) -> Result<SkillConversationReference, ConversationIdError>;

    /// Removes a single mapping.
    async fn delete_conversation_reference(
        &self,
        skill_conversation_id: &str,
    ) -> Result<(), ConversationIdError>;

    /// Reclaims every id minted for a host conversation.
    async fn delete_for_conversation(
        &self,
        conversation_key: &ConversationKey,
    ) -> Result<u64, ConversationIdError>;
}

/// Store-backed `ConversationIdFactory`.
#[derive(Clone)]
pub struct SkillConversationIdFactory {
    store: Arc<dyn SkillConversationStore>,
    ttl: Option<Duration>,
}

impl SkillConversationIdFactory {
    /// Creates a factory over the given store. Mappings never expire.
    #[must_use]
    pub fn new(store: Arc<dyn SkillConversationStore>) -> Self {
        if !store.is_durable() {
            warn!("skill conversation ids are stored in memory and will not survive a restart");
        }
        Self { store, ttl: None }
    }

    /// Sets a time-to-live after which mappings stop resolving.
    ///
    /// Mappings whose expiry falls past the end of representable time never
    /// expire.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl ConversationIdFactory for SkillConversationIdFactory {
    #[instrument(skip_all, fields(skill_id = %options.skill_id))]
    async fn create_skill_conversation_id(
        &self,
        options: &SkillConversationIdFactoryOptions,
    ) -> Result<SkillConversationId, ConversationIdError> {
        options.validate()?;

        let now = Utc::now();
        let candidate = SkillConversationRecord {
            id: SkillConversationId::new(),
            natural_key: options.natural_key(),
            conversation_key: options.conversation_reference.key(),
            reference: SkillConversationReference {
                conversation_reference: options.conversation_reference.clone(),
                oauth_scope: options.oauth_scope.clone(),
                skill_id: options.skill_id.clone(),
            },
            created_at: now,
            expires_at: self.ttl.and_then(|ttl| now.checked_add_signed(ttl)),
        };
        let candidate_id = candidate.id;

        let record = self.store.upsert(candidate).await?;
        if record.id == candidate_id {
            debug!(skill_conversation_id = %record.id, "minted skill conversation id");
        }
        Ok(record.id)
    }

    #[instrument(skip(self))]
    async fn get_conversation_reference(
        &self,
        skill_conversation_id: &str,
    ) -> Result<SkillConversationReference, ConversationIdError> {
        let not_found = || ConversationIdError::NotFound {
            id: skill_conversation_id.to_string(),
        };

        let Ok(id) = skill_conversation_id.parse::<SkillConversationId>() else {
            debug!("skill conversation id is not one this host minted");
            return Err(not_found());
        };

        let record = self.store.get(id).await?.ok_or_else(not_found)?;
        if record.is_expired_at(Utc::now()) {
            debug!("skill conversation id has expired");
            return Err(not_found());
        }

        Ok(record.reference)
    }

    async fn delete_conversation_reference(
        &self,
        skill_conversation_id: &str,
    ) -> Result<(), ConversationIdError> {
        match skill_conversation_id.parse::<SkillConversationId>() {
            Ok(id) => Ok(self.store.delete(id).await?),
            Err(_) => Ok(()),
        }
    }

    async fn delete_for_conversation(
        &self,
        conversation_key: &ConversationKey,
    ) -> Result<u64, ConversationIdError> {
        let removed = self.store.delete_for_conversation(conversation_key).await?;
        debug!(%conversation_key, removed, "reclaimed skill conversation ids");
        Ok(removed)
    }
}
