//! The host bot.
//!
//! A new conversation walks through a short setup: the user picks a delivery
//! mode, then a skill. From then on every channel activity is forwarded to
//! that skill until the skill ends the conversation.

use crate::adapter::{Bot, Delegation, DelegationResult, InvokeResponse, TurnContext};
use crate::error::TurnError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use skillgate_conversation::{
    Activity, ActivityType, ChannelAccount, ConversationIdFactory, ConversationState,
    DeliveryMode,
};
use skillgate_skills::{SkillDefinition, SkillsConfiguration};
use std::sync::Arc;
use tracing::{debug, info};

/// State key holding the id of the skill the conversation is delegated to.
pub const ACTIVE_SKILL_PROPERTY: &str = "activeSkillProperty";

/// State key holding the delivery mode chosen during setup.
pub const DELIVERY_MODE_PROPERTY: &str = "deliveryModeProperty";

const SETUP_STEP_PROPERTY: &str = "setupStep";

pub const WELCOME_MESSAGE: &str = "Hello and welcome!";
pub const DELIVERY_MODE_PROMPT: &str =
    "What delivery mode would you like to use? (normal, expectReplies)";
pub const BACK_IN_HOST_MESSAGE: &str = "Back in the host bot.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum SetupStep {
    DeliveryMode,
    Skill,
}

/// Routes a conversation between its own setup dialog and a skill.
pub struct HostBot {
    skills: SkillsConfiguration,
    id_factory: Arc<dyn ConversationIdFactory>,
}

impl HostBot {
    #[must_use]
    pub fn new(skills: SkillsConfiguration, id_factory: Arc<dyn ConversationIdFactory>) -> Self {
        Self { skills, id_factory }
    }

    fn skill_choices(&self) -> String {
        self.skills
            .iter()
            .map(|skill| skill.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn prompt_delivery_mode(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
        turn.send_text(DELIVERY_MODE_PROMPT).await?;
        turn.set_state(SETUP_STEP_PROPERTY, &SetupStep::DeliveryMode)
    }

    async fn prompt_skill(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
        turn.send_text(format!(
            "What skill would you like to call? ({})",
            self.skill_choices()
        ))
        .await?;
        turn.set_state(SETUP_STEP_PROPERTY, &SetupStep::Skill)
    }

    async fn run_setup(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
        let answer = turn
            .activity()
            .text
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();

        match turn.state().get::<SetupStep>(SETUP_STEP_PROPERTY) {
            None => self.prompt_delivery_mode(turn).await,
            Some(SetupStep::DeliveryMode) => match parse_delivery_mode(&answer) {
                Some(mode) => {
                    turn.set_state(DELIVERY_MODE_PROPERTY, &mode)?;
                    self.prompt_skill(turn).await
                }
                None => {
                    turn.send_text(format!(
                        "'{answer}' is not a delivery mode. {DELIVERY_MODE_PROMPT}"
                    ))
                    .await?;
                    Ok(())
                }
            },
            Some(SetupStep::Skill) => {
                let Some(skill) = self.skills.get(&answer).cloned() else {
                    turn.send_text(format!(
                        "'{answer}' is not a skill. What skill would you like to call? ({})",
                        self.skill_choices()
                    ))
                    .await?;
                    return Ok(());
                };
                turn.state_mut().remove(SETUP_STEP_PROPERTY);
                turn.set_state(ACTIVE_SKILL_PROPERTY, &skill.id)?;
                turn.send_text(format!("Got it, connecting you to the {} skill...", skill.id))
                    .await?;
                self.send_to_skill(turn, skill)
            }
        }
    }

    /// Forwards the current activity to `skill` with the chosen delivery mode.
    fn send_to_skill(
        &self,
        turn: &mut TurnContext,
        skill: SkillDefinition,
    ) -> Result<(), Report<TurnError>> {
        let mode = turn
            .state()
            .get::<DeliveryMode>(DELIVERY_MODE_PROPERTY)
            .unwrap_or_default();
        let mut activity = turn.activity().clone();
        activity.delivery_mode = (mode == DeliveryMode::ExpectReplies).then_some(mode);

        debug!(skill_id = %skill.id, delivery_mode = ?mode, "forwarding activity to skill");
        turn.delegate(skill, activity);
        Ok(())
    }

    /// The skill finished: report its outcome and start over.
    async fn on_skill_ended(
        &self,
        turn: &mut TurnContext,
        end: &Activity,
    ) -> Result<(), Report<TurnError>> {
        let skill_id = turn.state().get::<String>(ACTIVE_SKILL_PROPERTY);
        info!(skill_id = ?skill_id, code = ?end.code, "skill ended the conversation");
        clear_skill(turn.state_mut());

        let mut message = format!(
            "Received endOfConversation.\n\nCode: {}.",
            end.code.as_deref().unwrap_or("unknown")
        );
        if let Some(value) = &end.value {
            message.push_str(&format!("\n\nResult: {value}."));
        }
        turn.send_text(message).await?;
        turn.send_text(BACK_IN_HOST_MESSAGE).await?;
        self.prompt_delivery_mode(turn).await
    }

    async fn on_conversation_update(
        &self,
        turn: &mut TurnContext,
    ) -> Result<(), Report<TurnError>> {
        let activity = turn.activity();
        let bot_id = activity.recipient.as_ref().map(|bot| bot.id.clone());
        let is_bot = |member: &ChannelAccount| Some(&member.id) == bot_id.as_ref();
        let bot_removed = members(activity, "membersRemoved").iter().any(is_bot);
        let user_added = members(activity, "membersAdded")
            .iter()
            .any(|member| !is_bot(member));

        if bot_removed {
            let key = turn.reference().key();
            let reclaimed = self
                .id_factory
                .delete_for_conversation(&key)
                .await
                .map_err(TurnError::from)?;
            info!(conversation = %key, reclaimed, "host bot removed from conversation");
            *turn.state_mut() = ConversationState::new();
            return Ok(());
        }

        if user_added {
            turn.send_text(WELCOME_MESSAGE).await?;
            self.prompt_delivery_mode(turn).await?;
        }
        Ok(())
    }

    async fn on_skill_activity(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
        if turn.activity().is_end_of_conversation() {
            let end = turn.activity().clone();
            return self.on_skill_ended(turn, &end).await;
        }
        debug!(
            activity_type = %turn.activity().activity_type,
            name = ?turn.activity().name,
            caller_id = ?turn.activity().caller_id,
            "received activity from skill"
        );
        Ok(())
    }
}

#[async_trait]
impl Bot for HostBot {
    async fn on_turn(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
        if turn.is_from_skill() {
            return self.on_skill_activity(turn).await;
        }

        let activity_type = turn.activity().activity_type.clone();
        match activity_type {
            ActivityType::ConversationUpdate => self.on_conversation_update(turn).await,
            ActivityType::EndOfConversation => {
                // The user left: tell the skill and forget it.
                if let Some(skill) = self.active_skill(turn.state()) {
                    clear_skill(turn.state_mut());
                    let activity = turn.activity().clone();
                    turn.delegate(skill, activity);
                }
                Ok(())
            }
            _ => {
                if let Some(skill) = self.active_skill(turn.state()) {
                    return self.send_to_skill(turn, skill);
                }
                if activity_type == ActivityType::Message {
                    return self.run_setup(turn).await;
                }
                debug!(%activity_type, "ignoring activity outside a skill conversation");
                Ok(())
            }
        }
    }

    async fn on_delegation_result(
        &self,
        turn: &mut TurnContext,
        delegation: &Delegation,
        result: DelegationResult,
    ) -> Result<(), Report<TurnError>> {
        let (skill_conversation_id, response) = result.map_err(TurnError::from)?;

        if turn.activity().activity_type == ActivityType::Invoke {
            turn.set_invoke_response(InvokeResponse {
                status: response.status,
                body: response.body.clone(),
            });
        }

        if delegation.activity.delivery_mode() != DeliveryMode::ExpectReplies {
            return Ok(());
        }
        for reply in response.expected_replies() {
            if reply.is_end_of_conversation() {
                self.id_factory
                    .delete_conversation_reference(&skill_conversation_id.to_string())
                    .await
                    .map_err(TurnError::from)?;
                self.on_skill_ended(turn, &reply).await?;
            } else {
                turn.send_activity(reply).await?;
            }
        }
        Ok(())
    }

    fn active_skill(&self, state: &ConversationState) -> Option<SkillDefinition> {
        let id = state.get::<String>(ACTIVE_SKILL_PROPERTY)?;
        self.skills.get(&id).cloned()
    }
}

fn clear_skill(state: &mut ConversationState) {
    state.remove(ACTIVE_SKILL_PROPERTY);
    state.remove(DELIVERY_MODE_PROPERTY);
}

fn parse_delivery_mode(answer: &str) -> Option<DeliveryMode> {
    if answer.eq_ignore_ascii_case("normal") {
        Some(DeliveryMode::Normal)
    } else if answer.eq_ignore_ascii_case("expectReplies") {
        Some(DeliveryMode::ExpectReplies)
    } else {
        None
    }
}

fn members(activity: &Activity, field: &str) -> Vec<ChannelAccount> {
    activity
        .extra
        .get(field)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BotAdapter, CloudAdapter};
    use crate::connector::ChannelConnector;
    use crate::testing::{
        CHANNEL_SCOPE, RecordingConnector, SkillServer, channel_activity, memory_id_factory,
        skill_client,
    };
    use serde_json::json;
    use skillgate_auth::Claims;
    use skillgate_conversation::{
        ConversationKey, MemoryStateStorage, SkillConversationIdFactory,
        StateStorage, end_of_conversation_codes,
    };

    struct Harness {
        adapter: Arc<CloudAdapter>,
        connector: Arc<RecordingConnector>,
        storage: Arc<MemoryStateStorage>,
        id_factory: Arc<SkillConversationIdFactory>,
        skill: SkillServer,
    }

    impl Harness {
        async fn new() -> Self {
            let skill = SkillServer::start().await;
            let id_factory = memory_id_factory();
            let skills = SkillsConfiguration::new(
                "http://localhost:3978/api/skills",
                vec![skill.definition("echo")],
            );
            let bot = Arc::new(HostBot::new(
                skills,
                Arc::clone(&id_factory) as Arc<dyn ConversationIdFactory>,
            ));
            let connector = Arc::new(RecordingConnector::default());
            let storage = Arc::new(MemoryStateStorage::new());
            let adapter = Arc::new(CloudAdapter::new(
                bot,
                Arc::clone(&connector) as Arc<dyn ChannelConnector>,
                skill_client(Arc::clone(&id_factory) as Arc<dyn ConversationIdFactory>),
                Arc::clone(&storage) as Arc<dyn StateStorage>,
                CHANNEL_SCOPE,
            ));
            Self {
                adapter,
                connector,
                storage,
                id_factory,
                skill,
            }
        }

        async fn say(&self, text: &str) {
            self.adapter
                .process_activity(Claims::anonymous(), channel_activity("C1", text))
                .await
                .unwrap();
        }

        async fn state(&self) -> ConversationState {
            self.storage
                .read(&ConversationKey::new("test", "C1"))
                .await
                .unwrap()
                .unwrap_or_default()
        }

        /// Runs the setup dialog through to the skill.
        async fn connect(&self, mode: &str) {
            self.say("hi").await;
            self.say(mode).await;
            self.say("echo").await;
        }

        /// Delivers an activity as the skill would through its callback.
        async fn from_skill(&self, mut activity: Activity) {
            let reference = channel_activity("C1", "").conversation_reference().unwrap();
            activity.apply_conversation_reference(&reference, true);
            self.adapter
                .continue_conversation(Claims::anonymous_skill(), &reference, activity, CHANNEL_SCOPE)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn welcomes_new_members() {
        let h = Harness::new().await;
        let mut update = channel_activity("C1", "");
        update.activity_type = ActivityType::ConversationUpdate;
        update.text = None;
        update
            .extra
            .insert("membersAdded".to_string(), json!([{ "id": "user-1" }, { "id": "host-bot" }]));

        h.adapter
            .process_activity(Claims::anonymous(), update)
            .await
            .unwrap();

        assert_eq!(
            h.connector.texts().await,
            vec![WELCOME_MESSAGE, DELIVERY_MODE_PROMPT]
        );
    }

    #[tokio::test]
    async fn setup_connects_to_the_chosen_skill() {
        let h = Harness::new().await;
        h.connect("normal").await;

        assert_eq!(
            h.connector.texts().await,
            vec![
                DELIVERY_MODE_PROMPT,
                "What skill would you like to call? (echo)",
                "Got it, connecting you to the echo skill...",
            ]
        );
        let received = h.skill.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text.as_deref(), Some("echo"));
        assert_eq!(received[0].delivery_mode, None);

        let state = h.state().await;
        assert_eq!(state.get::<String>(ACTIVE_SKILL_PROPERTY).as_deref(), Some("echo"));
        assert!(!state.contains(SETUP_STEP_PROPERTY));
    }

    #[tokio::test]
    async fn active_skill_receives_later_messages() {
        let h = Harness::new().await;
        h.connect("normal").await;
        let sent_before = h.connector.texts().await.len();

        h.say("hello skill").await;

        let received = h.skill.received().await;
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].text.as_deref(), Some("hello skill"));
        assert_eq!(received[0].conversation_id(), received[1].conversation_id());
        assert_eq!(h.connector.texts().await.len(), sent_before);
    }

    #[tokio::test]
    async fn unknown_answers_reprompt() {
        let h = Harness::new().await;
        h.say("hi").await;
        h.say("sideways").await;
        h.say("normal").await;
        h.say("nope").await;

        let texts = h.connector.texts().await;
        assert_eq!(
            texts[1],
            format!("'sideways' is not a delivery mode. {DELIVERY_MODE_PROMPT}")
        );
        assert_eq!(
            texts[3],
            "'nope' is not a skill. What skill would you like to call? (echo)"
        );
        assert!(h.skill.received().await.is_empty());
    }

    #[tokio::test]
    async fn end_of_conversation_from_skill_returns_to_the_host() {
        let h = Harness::new().await;
        h.connect("normal").await;

        let mut end = Activity::end_of_conversation(end_of_conversation_codes::COMPLETED_SUCCESSFULLY);
        end.value = Some(json!("done"));
        h.from_skill(end).await;

        let texts = h.connector.texts().await;
        assert_eq!(
            texts[3..],
            [
                "Received endOfConversation.\n\nCode: completedSuccessfully.\n\nResult: \"done\".",
                BACK_IN_HOST_MESSAGE,
                DELIVERY_MODE_PROMPT,
            ]
        );
        let state = h.state().await;
        assert!(!state.contains(ACTIVE_SKILL_PROPERTY));
        assert_eq!(
            state.get::<SetupStep>(SETUP_STEP_PROPERTY),
            Some(SetupStep::DeliveryMode)
        );

        // Back in setup: the next message is not forwarded.
        h.say("normal").await;
        assert_eq!(h.skill.received().await.len(), 1);
    }

    #[tokio::test]
    async fn skill_events_are_not_forwarded_back() {
        let h = Harness::new().await;
        h.connect("normal").await;

        h.from_skill(Activity::event("progress", Some(json!(50)))).await;

        assert_eq!(h.skill.received().await.len(), 1);
        assert_eq!(h.connector.texts().await.len(), 3);
        assert_eq!(
            h.state().await.get::<String>(ACTIVE_SKILL_PROPERTY).as_deref(),
            Some("echo")
        );
    }

    #[tokio::test]
    async fn expect_replies_are_relayed_to_the_channel() {
        let h = Harness::new().await;
        h.skill
            .reply_with(json!({
                "activities": [
                    { "type": "message", "text": "echo: echo" },
                    { "type": "endOfConversation", "code": "completedSuccessfully" },
                ]
            }))
            .await;

        h.connect("expectReplies").await;

        let received = h.skill.received().await;
        assert_eq!(received[0].delivery_mode, Some(DeliveryMode::ExpectReplies));
        let texts = h.connector.texts().await;
        assert_eq!(
            texts[3..],
            [
                "echo: echo",
                "Received endOfConversation.\n\nCode: completedSuccessfully.",
                BACK_IN_HOST_MESSAGE,
                DELIVERY_MODE_PROMPT,
            ]
        );
        let skill_conversation_id = received[0].conversation_id().unwrap();
        assert!(
            h.id_factory
                .get_conversation_reference(skill_conversation_id)
                .await
                .is_err()
        );
        assert!(!h.state().await.contains(ACTIVE_SKILL_PROPERTY));
    }

    #[tokio::test]
    async fn skill_failure_resets_the_conversation() {
        let h = Harness::new().await;
        h.skill.fail_with(500).await;

        h.connect("normal").await;

        let texts = h.connector.texts().await;
        assert_eq!(
            texts[3..],
            [
                crate::adapter::TURN_ERROR_MESSAGE,
                crate::adapter::TURN_ERROR_HINT
            ]
        );
        assert!(h.state().await.is_empty());
        let received = h.skill.received().await;
        assert!(received.last().unwrap().is_end_of_conversation());
    }

    #[tokio::test]
    async fn removing_the_bot_reclaims_skill_conversation_ids() {
        let h = Harness::new().await;
        h.connect("normal").await;
        let skill_conversation_id = h.skill.received().await[0]
            .conversation_id()
            .unwrap()
            .to_string();

        let mut update = channel_activity("C1", "");
        update.activity_type = ActivityType::ConversationUpdate;
        update.text = None;
        update
            .extra
            .insert("membersRemoved".to_string(), json!([{ "id": "host-bot" }]));
        h.adapter
            .process_activity(Claims::anonymous(), update)
            .await
            .unwrap();

        assert!(
            h.id_factory
                .get_conversation_reference(&skill_conversation_id)
                .await
                .is_err()
        );
        assert!(h.state().await.is_empty());
    }

    #[tokio::test]
    async fn user_end_of_conversation_is_forwarded_to_the_skill() {
        let h = Harness::new().await;
        h.connect("normal").await;

        let mut end = channel_activity("C1", "");
        end.activity_type = ActivityType::EndOfConversation;
        end.text = None;
        end.code = Some(end_of_conversation_codes::USER_CANCELLED.to_string());
        h.adapter
            .process_activity(Claims::anonymous(), end)
            .await
            .unwrap();

        let received = h.skill.received().await;
        assert!(received[1].is_end_of_conversation());
        assert!(!h.state().await.contains(ACTIVE_SKILL_PROPERTY));
    }
}
