//! Activity types exchanged between channels, the host, and skills.
//!
//! The wire format is the bot-framework activity schema (camelCase JSON).
//! Fields the host does not interpret are preserved in `extra` so that
//! forwarding an activity to a skill does not drop channel-specific data.

use crate::reference::ConversationReference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use skillgate_core::ActivityId;
use std::fmt;

/// Codes carried by `endOfConversation` activities.
pub mod end_of_conversation_codes {
    /// The conversation ended normally.
    pub const COMPLETED_SUCCESSFULLY: &str = "completedSuccessfully";
    /// The user cancelled the conversation.
    pub const USER_CANCELLED: &str = "userCancelled";
    /// The bot took too long to respond.
    pub const BOT_TIMED_OUT: &str = "botTimedOut";
    /// The bot sent an activity the channel rejected.
    pub const BOT_ISSUED_INVALID_MESSAGE: &str = "botIssuedInvalidMessage";
    /// The channel failed.
    pub const CHANNEL_FAILED: &str = "channelFailed";
    /// No code was given.
    pub const UNKNOWN: &str = "unknown";
}

/// The type of an activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    /// A message to be shown to the recipient.
    Message,
    /// A programmatic event.
    Event,
    /// The sender ended the conversation.
    EndOfConversation,
    /// Members joined or left the conversation.
    ConversationUpdate,
    /// A request that expects a response in the HTTP body.
    Invoke,
    /// The sender is typing.
    Typing,
    /// Any activity type the host does not interpret.
    Other(String),
}

impl ActivityType {
    /// Returns the wire name of the activity type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Event => "event",
            Self::EndOfConversation => "endOfConversation",
            Self::ConversationUpdate => "conversationUpdate",
            Self::Invoke => "invoke",
            Self::Typing => "typing",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => Self::Message,
            "event" => Self::Event,
            "endOfConversation" => Self::EndOfConversation,
            "conversationUpdate" => Self::ConversationUpdate,
            "invoke" => Self::Invoke,
            "typing" => Self::Typing,
            _ => Self::Other(value),
        }
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Other(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the sender expects replies to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// Replies are posted back to the sender's service URL.
    #[default]
    Normal,
    /// Replies are returned in the HTTP response body.
    ExpectReplies,
    /// Any mode the host does not interpret.
    #[serde(other)]
    Other,
}

/// A participant in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    /// Channel-specific identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role of the participant (`user` or `bot`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ChannelAccount {
    /// Creates an account with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: None,
        }
    }
}

/// The conversation an activity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    /// Channel-specific conversation identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether the conversation has more than two participants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    /// Channel-specific conversation type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    /// Tenant the conversation belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl ConversationAccount {
    /// Creates a conversation account with only an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: None,
            conversation_type: None,
            tenant_id: None,
        }
    }
}

/// A single activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// The activity type.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Identifier assigned by the sender's channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// When the activity was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Where replies to this activity must be sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    /// The channel the activity came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// The sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    /// The conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    /// The recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Event or invoke name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Event, invoke or end-of-conversation payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    /// End-of-conversation code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// The activity this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Locale of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// How replies are delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<DeliveryMode>,
    /// Identity of the caller that produced this activity, set by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    /// Channel-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<JsonValue>,
    /// Fields not interpreted by the host.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Activity {
    /// Creates an empty activity of the given type.
    #[must_use]
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            id: None,
            timestamp: None,
            service_url: None,
            channel_id: None,
            from: None,
            conversation: None,
            recipient: None,
            text: None,
            name: None,
            value: None,
            code: None,
            reply_to_id: None,
            locale: None,
            delivery_mode: None,
            caller_id: None,
            channel_data: None,
            extra: Map::new(),
        }
    }

    /// Creates a text message.
    #[must_use]
    pub fn message(text: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::Message);
        activity.text = Some(text.into());
        activity
    }

    /// Creates a named event.
    #[must_use]
    pub fn event(name: impl Into<String>, value: Option<JsonValue>) -> Self {
        let mut activity = Self::new(ActivityType::Event);
        activity.name = Some(name.into());
        activity.value = value;
        activity
    }

    /// Creates an end-of-conversation activity with the given code.
    #[must_use]
    pub fn end_of_conversation(code: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::EndOfConversation);
        activity.code = Some(code.into());
        activity
    }

    /// Returns the conversation id, if present.
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    /// Returns the effective delivery mode.
    #[must_use]
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode.unwrap_or_default()
    }

    /// Returns true for end-of-conversation activities.
    #[must_use]
    pub fn is_end_of_conversation(&self) -> bool {
        self.activity_type == ActivityType::EndOfConversation
    }

    /// Builds the reference needed to resume this activity's conversation.
    ///
    /// Returns `None` if the activity lacks a channel id, service URL or
    /// conversation.
    #[must_use]
    pub fn conversation_reference(&self) -> Option<ConversationReference> {
        let channel_id = self.channel_id.clone()?;
        let service_url = self.service_url.clone()?;
        let conversation = self.conversation.clone()?;
        Some(ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation,
            channel_id,
            service_url,
            locale: self.locale.clone(),
        })
    }

    /// Addresses this activity using a conversation reference.
    ///
    /// Outgoing activities are sent from the bot to the user and reply to the
    /// reference's activity. Incoming activities are addressed from the user
    /// to the bot, as if the channel had delivered them.
    pub fn apply_conversation_reference(
        &mut self,
        reference: &ConversationReference,
        is_incoming: bool,
    ) {
        self.channel_id = Some(reference.channel_id.clone());
        self.service_url = Some(reference.service_url.clone());
        self.conversation = Some(reference.conversation.clone());
        if self.locale.is_none() {
            self.locale = reference.locale.clone();
        }

        if is_incoming {
            self.from = reference.user.clone();
            self.recipient = reference.bot.clone();
            if reference.activity_id.is_some() {
                self.id = reference.activity_id.clone();
            }
        } else {
            self.from = reference.bot.clone();
            self.recipient = reference.user.clone();
            if reference.activity_id.is_some() {
                self.reply_to_id = reference.activity_id.clone();
            }
        }
    }

    /// Creates a message replying to this activity.
    #[must_use]
    pub fn create_reply(&self, text: impl Into<String>) -> Self {
        let mut reply = Self::message(text);
        reply.timestamp = Some(Utc::now());
        reply.from = self.recipient.clone();
        reply.recipient = self.from.clone();
        reply.reply_to_id = self.id.clone();
        reply.service_url = self.service_url.clone();
        reply.channel_id = self.channel_id.clone();
        reply.conversation = self.conversation.clone();
        reply.locale = self.locale.clone();
        reply
    }
}

/// Response returned after an activity has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResponse {
    /// Identifier of the accepted activity.
    pub id: String,
}

impl ResourceResponse {
    /// Creates a response for the given activity id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Creates a response with a freshly minted id.
    #[must_use]
    pub fn generated() -> Self {
        Self::new(ActivityId::new().to_string())
    }
}
