//! Conversation addressing.
//!
//! A `ConversationReference` carries enough addressing to resume a
//! conversation on its original channel. A `ConversationKey` names a host
//! conversation for locking and state storage.

use crate::activity::{ChannelAccount, ConversationAccount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressing information for a host-side conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    /// The activity the reference was taken from, used as `replyToId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    /// The user side of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,
    /// The bot side of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<ChannelAccount>,
    /// The conversation.
    pub conversation: ConversationAccount,
    /// The channel hosting the conversation.
    pub channel_id: String,
    /// The channel's service URL.
    pub service_url: String,
    /// Locale of the conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ConversationReference {
    /// Creates a reference from the minimal addressing triple.
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            activity_id: None,
            user: None,
            bot: None,
            conversation: ConversationAccount::new(conversation_id),
            channel_id: channel_id.into(),
            service_url: service_url.into(),
            locale: None,
        }
    }

    /// Returns the key naming this conversation.
    #[must_use]
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(&self.channel_id, &self.conversation.id)
    }
}

/// Key naming a host conversation: `{channel_id}/conversations/{conversation_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Creates a key from a channel id and a conversation id.
    #[must_use]
    pub fn new(channel_id: &str, conversation_id: &str) -> Self {
        Self(format!("{channel_id}/conversations/{conversation_id}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the host records for each skill conversation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillConversationReference {
    /// The host conversation the skill conversation belongs to.
    pub conversation_reference: ConversationReference,
    /// OAuth scope to use when replying on the host conversation's channel.
    pub oauth_scope: String,
    /// The skill the conversation was delegated to.
    pub skill_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let reference = ConversationReference::new("msteams", "C1", "https://example.test/");
        assert_eq!(reference.key().as_str(), "msteams/conversations/C1");
    }

    #[test]
    fn keys_distinguish_channels() {
        let a = ConversationReference::new("msteams", "C1", "https://example.test/");
        let b = ConversationReference::new("webchat", "C1", "https://example.test/");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn reference_serializes_camel_case() {
        let reference = ConversationReference::new("msteams", "C1", "https://example.test/");
        let json = serde_json::to_value(&reference).expect("serialize");
        assert_eq!(json["channelId"], "msteams");
        assert_eq!(json["serviceUrl"], "https://example.test/");
        assert_eq!(json["conversation"]["id"], "C1");
    }
}
