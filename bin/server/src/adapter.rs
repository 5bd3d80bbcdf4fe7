//! Turn processing for the host bot.
//!
//! A turn runs in up to two locked phases. The bot handles the activity
//! under the conversation's turn lock and may ask for it to be delegated to a
//! skill. The lock is released while the skill is called, then re-acquired
//! so the bot can act on the skill's answer. State is loaded after each
//! acquisition and saved before each release.

use crate::connector::ChannelConnector;
use crate::error::TurnError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use skillgate_auth::Claims;
use skillgate_conversation::{
    Activity, ActivityType, ConversationKey, ConversationReference, ConversationState,
    DeliveryMode, ResourceResponse, SkillConversationIdFactoryOptions, StateStorage, TurnLocks,
};
use skillgate_core::SkillConversationId;
use skillgate_skills::{SkillClientError, SkillDefinition, SkillHttpClient, SkillResponse};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Sent to the user when a turn fails.
pub const TURN_ERROR_MESSAGE: &str = "The bot encountered an error or bug.";

/// Sent after [`TURN_ERROR_MESSAGE`].
pub const TURN_ERROR_HINT: &str = "To continue to run this bot, please fix the bot source code.";

/// End-of-conversation code sent to a skill abandoned because of an error.
pub const SKILL_ERROR_CODE: &str = "SkillError";

/// What the host answers on `/api/messages`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResponse {
    /// HTTP status.
    pub status: u16,
    /// Optional JSON body.
    pub body: Option<JsonValue>,
}

impl InvokeResponse {
    /// An accepted activity with nothing to return.
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            status: 202,
            body: None,
        }
    }
}

/// A request from the bot to forward an activity to a skill.
#[derive(Debug, Clone)]
pub struct Delegation {
    /// The skill to call.
    pub skill: SkillDefinition,
    /// The activity to send.
    pub activity: Activity,
}

/// The skill's answer to a delegation.
pub type DelegationResult = Result<(SkillConversationId, SkillResponse), SkillClientError>;

/// Everything the bot sees and can do during a turn.
pub struct TurnContext {
    activity: Activity,
    claims: Claims,
    reference: ConversationReference,
    oauth_scope: String,
    state: ConversationState,
    connector: Arc<dyn ChannelConnector>,
    buffered_replies: Option<Vec<Activity>>,
    delegation: Option<Delegation>,
    invoke_response: Option<InvokeResponse>,
}

impl TurnContext {
    fn new(
        activity: Activity,
        claims: Claims,
        reference: ConversationReference,
        oauth_scope: String,
        connector: Arc<dyn ChannelConnector>,
        buffer_replies: bool,
    ) -> Self {
        Self {
            activity,
            claims,
            reference,
            oauth_scope,
            state: ConversationState::new(),
            connector,
            buffered_replies: buffer_replies.then(Vec::new),
            delegation: None,
            invoke_response: None,
        }
    }

    /// The activity being processed.
    #[must_use]
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Claims of the caller that sent the activity.
    #[must_use]
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Returns true if the activity was sent by a skill rather than a channel.
    #[must_use]
    pub fn is_from_skill(&self) -> bool {
        self.claims.is_skill_claim()
    }

    /// The host conversation the turn belongs to.
    #[must_use]
    pub fn reference(&self) -> &ConversationReference {
        &self.reference
    }

    /// OAuth scope for replying on the conversation's channel.
    #[must_use]
    pub fn oauth_scope(&self) -> &str {
        &self.oauth_scope
    }

    /// The conversation's state.
    #[must_use]
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// The conversation's state, for modification. Saved when the phase ends.
    pub fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    /// Writes a state property.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded.
    pub fn set_state<T: serde::Serialize>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<(), Report<TurnError>> {
        self.state
            .set(key, value)
            .map_err(|e| TurnError::StateEncoding {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Sends an activity to the conversation.
    ///
    /// The activity is addressed from the bot to the user. When the inbound
    /// activity asked for `expectReplies`, it is buffered for the HTTP
    /// response instead of being sent.
    pub async fn send_activity(
        &mut self,
        mut activity: Activity,
    ) -> Result<ResourceResponse, Report<TurnError>> {
        activity.apply_conversation_reference(&self.reference, false);

        if let Some(replies) = self.buffered_replies.as_mut() {
            let response = activity
                .id
                .clone()
                .map_or_else(ResourceResponse::generated, ResourceResponse::new);
            replies.push(activity);
            return Ok(response);
        }

        let response = self
            .connector
            .send_activity(&activity, &self.oauth_scope)
            .await
            .map_err(TurnError::from)?;
        Ok(response)
    }

    /// Sends a text message to the conversation.
    pub async fn send_text(
        &mut self,
        text: impl Into<String>,
    ) -> Result<ResourceResponse, Report<TurnError>> {
        self.send_activity(Activity::message(text)).await
    }

    /// Asks the adapter to forward `activity` to `skill` once the lock is released.
    pub fn delegate(&mut self, skill: SkillDefinition, activity: Activity) {
        self.delegation = Some(Delegation { skill, activity });
    }

    /// Sets the response returned to the channel for this activity.
    pub fn set_invoke_response(&mut self, response: InvokeResponse) {
        self.invoke_response = Some(response);
    }

    fn into_response(self) -> InvokeResponse {
        if let Some(response) = self.invoke_response {
            return response;
        }
        match self.buffered_replies {
            Some(replies) => InvokeResponse {
                status: 200,
                body: Some(json!({ "activities": replies })),
            },
            None => InvokeResponse::accepted(),
        }
    }
}

/// The bot driven by the adapter.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Handles an activity. Runs under the conversation's turn lock.
    async fn on_turn(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>>;

    /// Handles a skill's answer to a delegation requested by `on_turn`.
    /// Runs under the conversation's turn lock.
    async fn on_delegation_result(
        &self,
        turn: &mut TurnContext,
        delegation: &Delegation,
        result: DelegationResult,
    ) -> Result<(), Report<TurnError>>;

    /// Returns the skill the conversation is currently delegated to.
    fn active_skill(&self, state: &ConversationState) -> Option<SkillDefinition>;
}

/// The adapter operations the skill callback handler relies on.
#[async_trait]
pub trait BotAdapter: Send + Sync {
    /// Runs a turn for an activity addressed to an existing host conversation.
    async fn continue_conversation(
        &self,
        claims: Claims,
        reference: &ConversationReference,
        activity: Activity,
        oauth_scope: &str,
    ) -> Result<(), Report<TurnError>>;

    /// Sends already addressed activities to their channel.
    async fn send_activities(
        &self,
        activities: Vec<Activity>,
        oauth_scope: &str,
    ) -> Result<Vec<ResourceResponse>, Report<TurnError>>;

    /// Replaces an activity on its channel.
    async fn update_activity(
        &self,
        activity: Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, Report<TurnError>>;

    /// Deletes an activity from its channel.
    async fn delete_activity(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        oauth_scope: &str,
    ) -> Result<(), Report<TurnError>>;
}

enum PhaseEnd {
    Done,
    Delegate(Delegation),
    Abandon(SkillDefinition),
}

/// Adapter connecting channels, the bot, conversation state and skills.
pub struct CloudAdapter {
    bot: Arc<dyn Bot>,
    connector: Arc<dyn ChannelConnector>,
    skill_client: SkillHttpClient,
    storage: Arc<dyn StateStorage>,
    locks: TurnLocks,
    channel_oauth_scope: String,
}

impl CloudAdapter {
    /// Creates an adapter.
    ///
    /// `channel_oauth_scope` is the scope of tokens used to reply on
    /// conversations that arrive through `/api/messages`.
    #[must_use]
    pub fn new(
        bot: Arc<dyn Bot>,
        connector: Arc<dyn ChannelConnector>,
        skill_client: SkillHttpClient,
        storage: Arc<dyn StateStorage>,
        channel_oauth_scope: impl Into<String>,
    ) -> Self {
        if !storage.is_durable() {
            warn!("conversation state is stored in memory and will not survive a restart");
        }
        Self {
            bot,
            connector,
            skill_client,
            storage,
            locks: TurnLocks::default(),
            channel_oauth_scope: channel_oauth_scope.into(),
        }
    }

    /// Returns the per-conversation turn locks.
    #[must_use]
    pub fn locks(&self) -> &TurnLocks {
        &self.locks
    }

    /// Processes an activity received from a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity cannot be addressed or conversation
    /// state cannot be loaded or saved. Failures inside the bot are handled
    /// by the turn error handler.
    #[instrument(
        skip_all,
        fields(
            activity_type = %activity.activity_type,
            conversation_id = activity.conversation_id().unwrap_or_default(),
        )
    )]
    pub async fn process_activity(
        &self,
        claims: Claims,
        activity: Activity,
    ) -> Result<InvokeResponse, Report<TurnError>> {
        let reference = activity
            .conversation_reference()
            .ok_or_else(|| TurnError::InvalidActivity {
                reason: "activity lacks a channel id, service URL or conversation".to_string(),
            })?;
        let buffer_replies = activity.delivery_mode() == DeliveryMode::ExpectReplies;
        let oauth_scope = self.channel_oauth_scope.clone();
        self.run_turn(claims, activity, reference, oauth_scope, buffer_replies)
            .await
    }

    async fn run_turn(
        &self,
        claims: Claims,
        activity: Activity,
        reference: ConversationReference,
        oauth_scope: String,
        buffer_replies: bool,
    ) -> Result<InvokeResponse, Report<TurnError>> {
        let key = reference.key();
        let mut turn = TurnContext::new(
            activity,
            claims,
            reference,
            oauth_scope,
            Arc::clone(&self.connector),
            buffer_replies,
        );

        let end = {
            let _guard = self.locks.acquire(&key).await;
            turn.state = self.load_state(&key).await?;
            let outcome = self.bot.on_turn(&mut turn).await;
            self.end_phase(&key, &mut turn, outcome).await?
        };

        let end = match end {
            PhaseEnd::Delegate(delegation) => {
                let result = self.delegate(&turn, &delegation).await;
                let _guard = self.locks.acquire(&key).await;
                turn.state = self.load_state(&key).await?;
                let outcome = self
                    .bot
                    .on_delegation_result(&mut turn, &delegation, result)
                    .await;
                self.end_phase(&key, &mut turn, outcome).await?
            }
            end => end,
        };

        match end {
            PhaseEnd::Done => {}
            PhaseEnd::Delegate(delegation) => {
                warn!(skill_id = %delegation.skill.id, "ignoring delegation requested while handling a skill result");
            }
            PhaseEnd::Abandon(skill) => self.abandon_skill(&turn, &skill).await,
        }

        Ok(turn.into_response())
    }

    async fn delegate(&self, turn: &TurnContext, delegation: &Delegation) -> DelegationResult {
        let options = SkillConversationIdFactoryOptions::new(
            turn.reference().clone(),
            delegation.skill.id.clone(),
            turn.oauth_scope(),
        );
        self.skill_client
            .forward_activity(&options, &delegation.activity, &delegation.skill)
            .await
            .map_err(|report| {
                warn!(error = %report, skill_id = %delegation.skill.id, "delegation failed");
                report.current_context().clone()
            })
    }

    async fn end_phase(
        &self,
        key: &ConversationKey,
        turn: &mut TurnContext,
        outcome: Result<(), Report<TurnError>>,
    ) -> Result<PhaseEnd, Report<TurnError>> {
        match outcome {
            Ok(()) => {
                self.save_state(key, &turn.state).await?;
                Ok(turn
                    .delegation
                    .take()
                    .map_or(PhaseEnd::Done, PhaseEnd::Delegate))
            }
            Err(report) => {
                let abandoned = self.on_turn_error(key, turn, &report).await;
                Ok(abandoned.map_or(PhaseEnd::Done, PhaseEnd::Abandon))
            }
        }
    }

    /// Reports a failed turn to the user and resets the conversation.
    ///
    /// Returns the skill the conversation was delegated to, which must be
    /// told the conversation is over.
    async fn on_turn_error(
        &self,
        key: &ConversationKey,
        turn: &mut TurnContext,
        report: &Report<TurnError>,
    ) -> Option<SkillDefinition> {
        error!(error = %report, conversation = %key, "unhandled error in turn");

        turn.delegation = None;
        for text in [TURN_ERROR_MESSAGE, TURN_ERROR_HINT] {
            if let Err(err) = turn.send_text(text).await {
                warn!(error = %err, "failed to send error message");
            }
        }

        let active_skill = self.bot.active_skill(&turn.state);
        turn.state = ConversationState::new();
        if let Err(err) = self.storage.delete(key).await {
            error!(error = %err, conversation = %key, "failed to clear conversation state");
        }
        active_skill
    }

    async fn abandon_skill(&self, turn: &TurnContext, skill: &SkillDefinition) {
        let mut end = Activity::end_of_conversation(SKILL_ERROR_CODE);
        end.apply_conversation_reference(turn.reference(), true);
        let options = SkillConversationIdFactoryOptions::new(
            turn.reference().clone(),
            skill.id.clone(),
            turn.oauth_scope(),
        );
        match self.skill_client.forward_activity(&options, &end, skill).await {
            Ok(_) => info!(skill_id = %skill.id, "ended skill conversation after error"),
            Err(report) => {
                warn!(error = %report, skill_id = %skill.id, "failed to end skill conversation")
            }
        }
    }

    async fn load_state(
        &self,
        key: &ConversationKey,
    ) -> Result<ConversationState, Report<TurnError>> {
        let state = self.storage.read(key).await.map_err(TurnError::from)?;
        Ok(state.unwrap_or_default())
    }

    async fn save_state(
        &self,
        key: &ConversationKey,
        state: &ConversationState,
    ) -> Result<(), Report<TurnError>> {
        if state.is_empty() {
            self.storage.delete(key).await.map_err(TurnError::from)?;
        } else {
            self.storage.write(key, state).await.map_err(TurnError::from)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BotAdapter for CloudAdapter {
    #[instrument(
        skip_all,
        fields(
            activity_type = %activity.activity_type,
            conversation_id = %reference.conversation.id,
        )
    )]
    async fn continue_conversation(
        &self,
        claims: Claims,
        reference: &ConversationReference,
        activity: Activity,
        oauth_scope: &str,
    ) -> Result<(), Report<TurnError>> {
        debug!("continuing conversation");
        self.run_turn(
            claims,
            activity,
            reference.clone(),
            oauth_scope.to_string(),
            false,
        )
        .await?;
        Ok(())
    }

    async fn send_activities(
        &self,
        activities: Vec<Activity>,
        oauth_scope: &str,
    ) -> Result<Vec<ResourceResponse>, Report<TurnError>> {
        let mut responses = Vec::with_capacity(activities.len());
        for activity in &activities {
            if activity.activity_type == ActivityType::Other("delay".to_string()) {
                continue;
            }
            let response = self
                .connector
                .send_activity(activity, oauth_scope)
                .await
                .map_err(TurnError::from)?;
            responses.push(response);
        }
        Ok(responses)
    }

    async fn update_activity(
        &self,
        activity: Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, Report<TurnError>> {
        let response = self
            .connector
            .update_activity(&activity, oauth_scope)
            .await
            .map_err(TurnError::from)?;
        Ok(response)
    }

    async fn delete_activity(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        oauth_scope: &str,
    ) -> Result<(), Report<TurnError>> {
        self.connector
            .delete_activity(reference, activity_id, oauth_scope)
            .await
            .map_err(TurnError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        RecordingConnector, SkillServer, channel_activity, memory_skill_client,
    };
    use skillgate_conversation::MemoryStateStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Counts turns in state, fails on "fail", delegates on "delegate".
    struct ScriptedBot {
        skill: Option<SkillDefinition>,
        in_turn: AtomicUsize,
        max_in_turn: AtomicUsize,
        barrier: Option<Barrier>,
    }

    impl ScriptedBot {
        fn new(skill: Option<SkillDefinition>) -> Self {
            Self {
                skill,
                in_turn: AtomicUsize::new(0),
                max_in_turn: AtomicUsize::new(0),
                barrier: None,
            }
        }
    }

    #[async_trait]
    impl Bot for ScriptedBot {
        async fn on_turn(&self, turn: &mut TurnContext) -> Result<(), Report<TurnError>> {
            let now = self.in_turn.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_turn.fetch_max(now, Ordering::SeqCst);
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            } else {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.in_turn.fetch_sub(1, Ordering::SeqCst);

            if turn.is_from_skill() {
                let said = turn.activity().activity_type.to_string();
                turn.set_state("skillSaid", &said)?;
                return Ok(());
            }

            let turns = turn.state().get::<u32>("turns").unwrap_or(0) + 1;
            turn.set_state("turns", &turns)?;
            match turn.activity().text.as_deref() {
                Some("fail") => {
                    return Err(TurnError::InvalidActivity {
                        reason: "scripted failure".to_string(),
                    }
                    .into());
                }
                Some("delegate") => {
                    let skill = self.skill.clone().ok_or_else(|| TurnError::InvalidActivity {
                        reason: "no skill".to_string(),
                    })?;
                    turn.set_state("activeSkill", &skill.id)?;
                    let activity = turn.activity().clone();
                    turn.delegate(skill, activity);
                }
                _ => {
                    turn.send_text(format!("turn {turns}")).await?;
                }
            }
            Ok(())
        }

        async fn on_delegation_result(
            &self,
            turn: &mut TurnContext,
            _delegation: &Delegation,
            result: DelegationResult,
        ) -> Result<(), Report<TurnError>> {
            let (_, response) = result.map_err(TurnError::from)?;
            turn.set_state("skillStatus", &response.status)?;
            Ok(())
        }

        fn active_skill(&self, state: &ConversationState) -> Option<SkillDefinition> {
            let id = state.get::<String>("activeSkill")?;
            self.skill.clone().filter(|skill| skill.id == id)
        }
    }

    struct Harness {
        adapter: Arc<CloudAdapter>,
        connector: Arc<RecordingConnector>,
        storage: Arc<MemoryStateStorage>,
        bot: Arc<ScriptedBot>,
    }

    fn harness(bot: ScriptedBot) -> Harness {
        let bot = Arc::new(bot);
        let connector = Arc::new(RecordingConnector::default());
        let storage = Arc::new(MemoryStateStorage::new());
        let adapter = Arc::new(CloudAdapter::new(
            Arc::clone(&bot) as Arc<dyn Bot>,
            Arc::clone(&connector) as Arc<dyn ChannelConnector>,
            memory_skill_client(),
            Arc::clone(&storage) as Arc<dyn StateStorage>,
            "channel-scope",
        ));
        Harness {
            adapter,
            connector,
            storage,
            bot,
        }
    }

    #[tokio::test]
    async fn replies_are_sent_to_the_channel_and_state_persists() {
        let h = harness(ScriptedBot::new(None));

        let first = h
            .adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "hi"))
            .await
            .unwrap();
        h.adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "again"))
            .await
            .unwrap();

        assert_eq!(first, InvokeResponse::accepted());
        let texts = h.connector.texts().await;
        assert_eq!(texts, vec!["turn 1", "turn 2"]);
        let sent = h.connector.sent().await;
        assert_eq!(sent[0].conversation_id(), Some("C1"));
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("C1-activity"));
        assert_eq!(h.connector.scopes().await, vec!["channel-scope"; 2]);
    }

    #[tokio::test]
    async fn expect_replies_are_returned_in_the_body() {
        let h = harness(ScriptedBot::new(None));
        let mut activity = channel_activity("C1", "hi");
        activity.delivery_mode = Some(DeliveryMode::ExpectReplies);

        let response = h
            .adapter
            .process_activity(Claims::anonymous(), activity)
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["activities"][0]["text"], "turn 1");
        assert!(h.connector.sent().await.is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_pass_through_to_the_channel() {
        let h = harness(ScriptedBot::new(None));
        let reference = channel_activity("C1", "hi").conversation_reference().unwrap();
        let mut edited = Activity::message("edited");
        edited.apply_conversation_reference(&reference, false);
        edited.id = Some("channel-activity-7".to_string());

        let response = h
            .adapter
            .update_activity(edited, "channel-scope")
            .await
            .unwrap();
        h.adapter
            .delete_activity(&reference, "channel-activity-8", "channel-scope")
            .await
            .unwrap();

        assert_eq!(response.id, "channel-activity-7");
        let updated = h.connector.updated().await;
        assert_eq!(updated[0].text.as_deref(), Some("edited"));
        assert_eq!(
            h.connector.deleted().await,
            vec![("C1".to_string(), "channel-activity-8".to_string())]
        );
    }

    #[tokio::test]
    async fn channel_failures_surface_from_sends() {
        let h = harness(ScriptedBot::new(None));
        h.connector.fail();
        let mut reply = Activity::message("hello");
        reply.apply_conversation_reference(
            &channel_activity("C1", "hi").conversation_reference().unwrap(),
            false,
        );

        let err = h
            .adapter
            .send_activities(vec![reply], "channel-scope")
            .await
            .unwrap_err();

        assert!(matches!(err.current_context(), TurnError::Channel(_)));
    }

    #[tokio::test]
    async fn unaddressed_activities_are_rejected() {
        let h = harness(ScriptedBot::new(None));
        let err = h
            .adapter
            .process_activity(Claims::anonymous(), Activity::message("hi"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            TurnError::InvalidActivity { .. }
        ));
    }

    #[tokio::test]
    async fn turn_errors_notify_the_user_and_clear_state() {
        let h = harness(ScriptedBot::new(None));
        h.adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "hi"))
            .await
            .unwrap();

        let response = h
            .adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "fail"))
            .await
            .unwrap();

        assert_eq!(response, InvokeResponse::accepted());
        assert_eq!(
            h.connector.texts().await,
            vec!["turn 1", TURN_ERROR_MESSAGE, TURN_ERROR_HINT]
        );
        let key = ConversationKey::new("test", "C1");
        assert!(h.storage.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delegation_forwards_to_the_skill_and_records_the_result() {
        let skill_server = SkillServer::start().await;
        let h = harness(ScriptedBot::new(Some(skill_server.definition("echo"))));

        h.adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "delegate"))
            .await
            .unwrap();

        let received = skill_server.received().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text.as_deref(), Some("delegate"));
        assert!(received[0].conversation_id().unwrap().starts_with("skc_"));

        let state = h
            .storage
            .read(&ConversationKey::new("test", "C1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.get::<u16>("skillStatus"), Some(200));
        assert_eq!(h.adapter.locks().active(), 0);
    }

    #[tokio::test]
    async fn skill_failure_abandons_the_skill() {
        let skill_server = SkillServer::start().await;
        skill_server.fail_with(400).await;
        let h = harness(ScriptedBot::new(Some(skill_server.definition("echo"))));

        h.adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "delegate"))
            .await
            .unwrap();

        assert_eq!(
            h.connector.texts().await,
            vec![TURN_ERROR_MESSAGE, TURN_ERROR_HINT]
        );
        let received = skill_server.received().await;
        assert_eq!(received.len(), 2);
        assert!(received[1].is_end_of_conversation());
        assert_eq!(received[1].code.as_deref(), Some(SKILL_ERROR_CODE));
        assert_eq!(received[0].conversation_id(), received[1].conversation_id());
    }

    #[tokio::test]
    async fn skill_callbacks_run_while_the_skill_call_is_in_flight() {
        let skill_server = SkillServer::start().await;
        let h = harness(ScriptedBot::new(Some(skill_server.definition("echo"))));
        skill_server
            .call_back_with(Arc::clone(&h.adapter) as Arc<dyn BotAdapter>)
            .await;

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            h.adapter
                .process_activity(Claims::anonymous(), channel_activity("C1", "delegate")),
        )
        .await;

        assert!(result.is_ok(), "skill callback deadlocked on the turn lock");
        let state = h
            .storage
            .read(&ConversationKey::new("test", "C1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.get::<String>("skillSaid").as_deref(), Some("endOfConversation"));
        assert_eq!(state.get::<u16>("skillStatus"), Some(200));
    }

    #[tokio::test]
    async fn same_conversation_turns_are_serialized() {
        let h = harness(ScriptedBot::new(None));

        let turns = (0..4).map(|i| {
            let adapter = Arc::clone(&h.adapter);
            tokio::spawn(async move {
                adapter
                    .process_activity(Claims::anonymous(), channel_activity("C1", &format!("m{i}")))
                    .await
            })
        });
        for result in futures::future::join_all(turns).await {
            result.unwrap().unwrap();
        }

        assert_eq!(h.bot.max_in_turn.load(Ordering::SeqCst), 1);
        let state = h
            .storage
            .read(&ConversationKey::new("test", "C1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.get::<u32>("turns"), Some(4));
    }

    #[tokio::test]
    async fn different_conversations_run_in_parallel() {
        let mut bot = ScriptedBot::new(None);
        bot.barrier = Some(Barrier::new(2));
        let h = harness(bot);

        let a = h
            .adapter
            .process_activity(Claims::anonymous(), channel_activity("C1", "hi"));
        let b = h
            .adapter
            .process_activity(Claims::anonymous(), channel_activity("C2", "hi"));

        // Each turn waits at the barrier until the other has entered the bot.
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(a, b) })
            .await
            .expect("turns on different conversations blocked each other");
        a.unwrap();
        b.unwrap();
        assert_eq!(h.bot.max_in_turn.load(Ordering::SeqCst), 2);
    }
}
