//! Per-conversation state for the host bot.
//!
//! State is a JSON property bag loaded at the start of a turn and saved at
//! its end, always under the conversation's turn lock.

use crate::error::StoreError;
use crate::reference::ConversationKey;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A conversation's state bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationState {
    values: Map<String, JsonValue>,
}

impl ConversationState {
    /// Creates an empty state bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a property, returning `None` if it is absent or has another shape.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Writes a property.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Removes a property.
    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// Returns true if the property is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns true if no properties are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Trait for conversation state storage.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Reads the state for a conversation, if any was saved.
    async fn read(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError>;

    /// Saves the state for a conversation.
    async fn write(&self, key: &ConversationKey, state: &ConversationState)
    -> Result<(), StoreError>;

    /// Deletes the state for a conversation.
    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError>;

    /// Returns true if state survives a process restart.
    fn is_durable(&self) -> bool;
}

/// Non-durable, single-process state storage.
///
/// For tests and single-instance deployments: state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStateStorage {
    states: RwLock<HashMap<ConversationKey, ConversationState>>,
}

impl MemoryStateStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
    async fn read(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn write(
        &self,
        key: &ConversationKey,
        state: &ConversationState,
    ) -> Result<(), StoreError> {
        self.states.write().await.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        self.states.write().await.remove(key);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_properties() {
        let mut state = ConversationState::new();
        state.set("activeSkill", &"echo").unwrap();
        state.set("turns", &3_u32).unwrap();

        assert_eq!(state.get::<String>("activeSkill").as_deref(), Some("echo"));
        assert_eq!(state.get::<u32>("turns"), Some(3));
        assert_eq!(state.get::<u32>("activeSkill"), None);

        state.remove("activeSkill");
        assert!(!state.contains("activeSkill"));
    }

    #[test]
    fn state_serializes_as_plain_object() {
        let mut state = ConversationState::new();
        state.set("activeSkill", &"echo").unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({ "activeSkill": "echo" }));
    }

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStateStorage::new();
        let key = ConversationKey::new("msteams", "C1");
        assert!(storage.read(&key).await.unwrap().is_none());

        let mut state = ConversationState::new();
        state.set("activeSkill", &"echo").unwrap();
        storage.write(&key, &state).await.unwrap();

        assert_eq!(storage.read(&key).await.unwrap(), Some(state));

        storage.delete(&key).await.unwrap();
        assert!(storage.read(&key).await.unwrap().is_none());
        assert!(!storage.is_durable());
    }
}
