//! Channel-service endpoint for skills calling back into the host.
//!
//! Every callback is authenticated, authorized against the allow-list, and
//! resolved to the host conversation it belongs to before being delivered.
//! `endOfConversation` and `event` activities are run through the host bot as
//! a turn; everything else goes straight to the channel.

use crate::adapter::BotAdapter;
use crate::error::{SkillHandlerError, TurnError};
use rootcause::prelude::Report;
use skillgate_auth::{Claims, ClaimsValidator, TokenValidator};
use skillgate_conversation::{
    Activity, ActivityType, ConversationIdError, ConversationIdFactory, ResourceResponse,
    SkillConversationReference,
};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Handles activities sent by skills to `/api/skills/v3/conversations/...`.
pub struct SkillHandler {
    adapter: Arc<dyn BotAdapter>,
    id_factory: Arc<dyn ConversationIdFactory>,
    token_validator: Arc<dyn TokenValidator>,
    claims_validator: Arc<dyn ClaimsValidator>,
}

/// What is known about an activity before it is re-addressed.
struct Inbound {
    skill_conversation_id: String,
    activity_id: Option<String>,
    activity_type: String,
}

impl SkillHandler {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn BotAdapter>,
        id_factory: Arc<dyn ConversationIdFactory>,
        token_validator: Arc<dyn TokenValidator>,
        claims_validator: Arc<dyn ClaimsValidator>,
    ) -> Self {
        Self {
            adapter,
            id_factory,
            token_validator,
            claims_validator,
        }
    }

    /// Sends an activity to the end of a conversation.
    pub async fn send_to_conversation(
        &self,
        claims: Claims,
        conversation_id: &str,
        activity: Activity,
    ) -> Result<ResourceResponse, Report<SkillHandlerError>> {
        self.process_activity(claims, conversation_id, None, activity)
            .await
    }

    /// Sends an activity in reply to `activity_id`.
    pub async fn reply_to_activity(
        &self,
        claims: Claims,
        conversation_id: &str,
        activity_id: &str,
        activity: Activity,
    ) -> Result<ResourceResponse, Report<SkillHandlerError>> {
        self.process_activity(claims, conversation_id, Some(activity_id), activity)
            .await
    }

    /// Replaces `activity_id` in the host conversation.
    #[instrument(skip(self, claims, activity), fields(caller = claims.app_id()))]
    pub async fn update_activity(
        &self,
        claims: Claims,
        conversation_id: &str,
        activity_id: &str,
        mut activity: Activity,
    ) -> Result<ResourceResponse, Report<SkillHandlerError>> {
        let skill_reference = self.resolve(conversation_id).await?;
        let inbound = Inbound::new(conversation_id, &activity);

        let reference = &skill_reference.conversation_reference;
        activity.apply_conversation_reference(reference, false);
        activity.id = Some(activity_id.to_string());

        self.adapter
            .update_activity(activity, &skill_reference.oauth_scope)
            .await
            .map_err(|report| delivery_error(&inbound, &skill_reference, &report))
    }

    /// Deletes `activity_id` from the host conversation.
    #[instrument(skip(self, claims), fields(caller = claims.app_id()))]
    pub async fn delete_activity(
        &self,
        claims: Claims,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<(), Report<SkillHandlerError>> {
        let skill_reference = self.resolve(conversation_id).await?;
        let inbound = Inbound {
            skill_conversation_id: conversation_id.to_string(),
            activity_id: Some(activity_id.to_string()),
            activity_type: "delete".to_string(),
        };

        self.adapter
            .delete_activity(
                &skill_reference.conversation_reference,
                activity_id,
                &skill_reference.oauth_scope,
            )
            .await
            .map_err(|report| delivery_error(&inbound, &skill_reference, &report))
    }

    /// Rejects a channel-service operation the host does not serve.
    ///
    /// The caller is still authenticated so that unknown callers learn nothing
    /// about which operations exist.
    pub async fn unsupported(
        &self,
        token: Option<&str>,
        operation: &str,
    ) -> Report<SkillHandlerError> {
        if let Err(report) = self.authenticate(token).await {
            return report;
        }
        debug!(operation, "unsupported channel-service operation");
        SkillHandlerError::NotImplemented {
            operation: operation.to_string(),
        }
        .into()
    }

    /// Verifies the bearer token and checks the caller against the allow-list.
    ///
    /// Every other operation takes the claims returned here, so a callback is
    /// authenticated and authorized before its body is looked at. With
    /// authentication disabled every caller is treated as an anonymous skill
    /// and the allow-list does not apply.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
    ) -> Result<Claims, Report<SkillHandlerError>> {
        let claims = self
            .token_validator
            .validate(token)
            .await
            .map_err(SkillHandlerError::Unauthorized)?;

        if claims.is_anonymous() {
            return Ok(Claims::anonymous_skill());
        }

        self.claims_validator
            .validate(&claims)
            .map_err(SkillHandlerError::Forbidden)?;
        Ok(claims)
    }

    async fn resolve(
        &self,
        conversation_id: &str,
    ) -> Result<SkillConversationReference, Report<SkillHandlerError>> {
        match self.id_factory.get_conversation_reference(conversation_id).await {
            Ok(reference) => Ok(reference),
            Err(ConversationIdError::NotFound { .. }) => {
                warn!(skill_conversation_id = conversation_id, "unknown skill conversation");
                Err(SkillHandlerError::NotFound {
                    skill_conversation_id: conversation_id.to_string(),
                }
                .into())
            }
            Err(err) => Err(SkillHandlerError::Lookup(err).into()),
        }
    }

    #[instrument(
        skip(self, claims, activity),
        fields(activity_type = %activity.activity_type)
    )]
    async fn process_activity(
        &self,
        claims: Claims,
        conversation_id: &str,
        reply_to_id: Option<&str>,
        mut activity: Activity,
    ) -> Result<ResourceResponse, Report<SkillHandlerError>> {
        let skill_reference = self.resolve(conversation_id).await?;
        let inbound = Inbound::new(conversation_id, &activity);
        let reference = &skill_reference.conversation_reference;
        let oauth_scope = skill_reference.oauth_scope.as_str();

        match activity.activity_type {
            ActivityType::EndOfConversation | ActivityType::Event => {
                let is_end = activity.is_end_of_conversation();
                activity.apply_conversation_reference(reference, true);
                activity.caller_id = claims.caller_id();

                self.adapter
                    .continue_conversation(claims, reference, activity, oauth_scope)
                    .await
                    .map_err(|report| delivery_error(&inbound, &skill_reference, &report))?;

                if is_end {
                    self.release(conversation_id).await;
                }
                Ok(ResourceResponse::generated())
            }
            _ => {
                activity.apply_conversation_reference(reference, false);
                if let Some(reply_to_id) = reply_to_id {
                    activity.reply_to_id = Some(reply_to_id.to_string());
                }

                let mut responses = self
                    .adapter
                    .send_activities(vec![activity], oauth_scope)
                    .await
                    .map_err(|report| delivery_error(&inbound, &skill_reference, &report))?;
                Ok(responses.pop().unwrap_or_else(ResourceResponse::generated))
            }
        }
    }

    /// Forgets a skill conversation after the skill has ended it.
    async fn release(&self, conversation_id: &str) {
        match self.id_factory.delete_conversation_reference(conversation_id).await {
            Ok(()) => debug!(skill_conversation_id = conversation_id, "skill conversation ended"),
            Err(err) => warn!(
                error = %err,
                skill_conversation_id = conversation_id,
                "failed to delete ended skill conversation"
            ),
        }
    }
}

impl Inbound {
    fn new(skill_conversation_id: &str, activity: &Activity) -> Self {
        Self {
            skill_conversation_id: skill_conversation_id.to_string(),
            activity_id: activity.id.clone(),
            activity_type: activity.activity_type.to_string(),
        }
    }
}

fn delivery_error(
    inbound: &Inbound,
    skill_reference: &SkillConversationReference,
    report: &Report<TurnError>,
) -> Report<SkillHandlerError> {
    let service_url = skill_reference.conversation_reference.service_url.clone();
    error!(
        error = %report,
        skill_conversation_id = %inbound.skill_conversation_id,
        activity_id = ?inbound.activity_id,
        activity_type = %inbound.activity_type,
        service_url = %service_url,
        skill_id = %skill_reference.skill_id,
        "failed to deliver skill activity"
    );
    SkillHandlerError::Delivery {
        skill_conversation_id: inbound.skill_conversation_id.clone(),
        activity_id: inbound.activity_id.clone(),
        activity_type: inbound.activity_type.clone(),
        service_url,
        reason: report.current_context().to_string(),
    }
    .into()
}
