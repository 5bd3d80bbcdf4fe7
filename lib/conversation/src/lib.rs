//! Conversation layer for skillgate.
//!
//! This crate provides:
//!
//! - **Activity model**: The bot-framework-style activity payload
//! - **Conversation references**: Addressing needed to resume a host conversation
//! - **Conversation id factory**: Opaque skill conversation ids and their reverse mapping
//! - **State storage**: Per-conversation state for the host bot
//! - **Turn locks**: At most one in-flight turn per conversation

pub mod activity;
pub mod error;
pub mod id_factory;
pub mod reference;
pub mod state;
pub mod store;
pub mod turn_lock;

pub use activity::{
    Activity, ActivityType, ChannelAccount, ConversationAccount, DeliveryMode, ResourceResponse,
    end_of_conversation_codes,
};
pub use error::{ConversationIdError, StoreError};
pub use id_factory::{
    ConversationIdFactory, SkillConversationIdFactory, SkillConversationIdFactoryOptions,
};
pub use reference::{ConversationKey, ConversationReference, SkillConversationReference};
pub use state::{ConversationState, MemoryStateStorage, StateStorage};
pub use store::{MemorySkillConversationStore, SkillConversationRecord, SkillConversationStore};
pub use turn_lock::{TurnGuard, TurnLocks};
