//! Storage for skill conversation mappings.
//!
//! The `SkillConversationStore` trait is the seam between the id factory and
//! its backing store. `MemorySkillConversationStore` keeps mappings in process
//! memory and loses them on restart; multi-instance deployments must use a
//! durable implementation shared by every instance.

use crate::error::StoreError;
use crate::reference::{ConversationKey, SkillConversationReference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skillgate_core::SkillConversationId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A persisted skill conversation mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillConversationRecord {
    /// The opaque id handed to the skill.
    pub id: SkillConversationId,
    /// Uniqueness key: host conversation, skill and service URL.
    pub natural_key: String,
    /// The host conversation the mapping belongs to.
    pub conversation_key: ConversationKey,
    /// What the id resolves to.
    pub reference: SkillConversationReference,
    /// When the id was minted.
    pub created_at: DateTime<Utc>,
    /// When the id stops resolving, if it expires at all.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SkillConversationRecord {
    /// Returns true if the record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

/// Trait for skill conversation mapping storage.
///
/// Implementations must be safe for concurrent use from many tasks, and
/// `upsert` must be atomic with respect to the natural key.
#[async_trait]
pub trait SkillConversationStore: Send + Sync {
    /// Records `candidate` unless a live record already exists for its natural key.
    ///
    /// When a live record exists, its reference is refreshed from `candidate`
    /// and the existing record (with its original id) is returned. Otherwise
    /// `candidate` replaces any expired record and is returned.
    async fn upsert(
        &self,
        candidate: SkillConversationRecord,
    ) -> Result<SkillConversationRecord, StoreError>;

    /// Gets a record by id.
    async fn get(
        &self,
        id: SkillConversationId,
    ) -> Result<Option<SkillConversationRecord>, StoreError>;

    /// Deletes a record by id. Deleting an unknown id is not an error.
    async fn delete(&self, id: SkillConversationId) -> Result<(), StoreError>;

    /// Deletes every record minted for a host conversation.
    ///
    /// Returns the number of records removed.
    async fn delete_for_conversation(
        &self,
        conversation_key: &ConversationKey,
    ) -> Result<u64, StoreError>;

    /// Returns true if records survive a process restart.
    fn is_durable(&self) -> bool;
}

#[derive(Debug, Default)]
struct MemoryState {
    by_id: HashMap<SkillConversationId, SkillConversationRecord>,
    by_natural_key: HashMap<String, SkillConversationId>,
}

/// Non-durable, single-process store.
///
/// Suitable for tests and single-instance deployments only: mappings are lost
/// on restart and are not shared between instances.
#[derive(Debug, Default)]
pub struct MemorySkillConversationStore {
    state: RwLock<MemoryState>,
}

impl MemorySkillConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored mappings, live or expired.
    pub async fn len(&self) -> usize {
        self.state.read().await.by_id.len()
    }

    /// Returns true if no mappings are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SkillConversationStore for MemorySkillConversationStore {
    async fn upsert(
        &self,
        candidate: SkillConversationRecord,
    ) -> Result<SkillConversationRecord, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let existing_id = state.by_natural_key.get(&candidate.natural_key).copied();
        if let Some(existing_id) = existing_id {
            if let Some(existing) = state.by_id.get_mut(&existing_id) {
                if !existing.is_expired_at(now) {
                    existing.reference = candidate.reference;
                    return Ok(existing.clone());
                }
            }
            state.by_id.remove(&existing_id);
        }

        state
            .by_natural_key
            .insert(candidate.natural_key.clone(), candidate.id);
        state.by_id.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn get(
        &self,
        id: SkillConversationId,
    ) -> Result<Option<SkillConversationRecord>, StoreError> {
        Ok(self.state.read().await.by_id.get(&id).cloned())
    }

    async fn delete(&self, id: SkillConversationId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.by_id.remove(&id) {
            state.by_natural_key.remove(&record.natural_key);
        }
        Ok(())
    }

    async fn delete_for_conversation(
        &self,
        conversation_key: &ConversationKey,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let doomed: Vec<SkillConversationRecord> = state
            .by_id
            .values()
            .filter(|r| &r.conversation_key == conversation_key)
            .cloned()
            .collect();

        for record in &doomed {
            state.by_id.remove(&record.id);
            state.by_natural_key.remove(&record.natural_key);
        }

        Ok(doomed.len() as u64)
    }

    fn is_durable(&self) -> bool {
        false
    }
}
