//! HTTP client for posting activities to skills.

use crate::error::SkillClientError;
use crate::retry::RetryPolicy;
use crate::skill::SkillDefinition;
use crate::token::TokenProvider;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::Value as JsonValue;
use skillgate_auth::{CALLER_ID_PREFIX, default_scope};
use skillgate_conversation::{
    Activity, ChannelAccount, ConversationAccount, ConversationIdFactory,
    SkillConversationIdFactoryOptions,
};
use skillgate_core::SkillConversationId;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Statuses worth retrying: the skill is overloaded or briefly unavailable.
const TRANSIENT_STATUSES: [StatusCode; 4] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Longest rejected body kept for diagnostics.
const MAX_ERROR_BODY: usize = 1024;

/// What a skill answered.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body, if the skill sent one.
    pub body: Option<JsonValue>,
}

impl SkillResponse {
    /// Returns the activities carried by an `expectReplies` response.
    #[must_use]
    pub fn expected_replies(&self) -> Vec<Activity> {
        let Some(activities) = self.body.as_ref().and_then(|body| body.get("activities")) else {
            return Vec::new();
        };
        match serde_json::from_value(activities.clone()) {
            Ok(activities) => activities,
            Err(err) => {
                warn!(error = %err, "skill returned unreadable expected replies");
                Vec::new()
            }
        }
    }
}

struct AttemptError {
    error: SkillClientError,
    transient: bool,
}

impl AttemptError {
    fn permanent(error: SkillClientError) -> Self {
        Self {
            error,
            transient: false,
        }
    }
}

/// Posts activities to skills on behalf of the host.
#[derive(Clone)]
pub struct SkillHttpClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    id_factory: Arc<dyn ConversationIdFactory>,
    retry: RetryPolicy,
    host_app_id: String,
    skill_host_endpoint: String,
}

impl SkillHttpClient {
    /// Creates a client.
    ///
    /// `skill_host_endpoint` is the URL skills send their replies to.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        id_factory: Arc<dyn ConversationIdFactory>,
        host_app_id: impl Into<String>,
        skill_host_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            id_factory,
            retry: RetryPolicy::default(),
            host_app_id: host_app_id.into(),
            skill_host_endpoint: skill_host_endpoint.into(),
        }
    }

    /// Sets the retry policy for transient skill failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the id factory used by `forward_activity`.
    #[must_use]
    pub fn id_factory(&self) -> &Arc<dyn ConversationIdFactory> {
        &self.id_factory
    }

    /// Mints (or reuses) the skill conversation id for `options` and posts
    /// `activity` to `skill` under it.
    pub async fn forward_activity(
        &self,
        options: &SkillConversationIdFactoryOptions,
        activity: &Activity,
        skill: &SkillDefinition,
    ) -> skillgate_core::Result<(SkillConversationId, SkillResponse), SkillClientError> {
        let id = self
            .id_factory
            .create_skill_conversation_id(options)
            .await
            .map_err(SkillClientError::from)?;
        let response = self.post_activity(id, activity, skill).await?;
        Ok((id, response))
    }

    /// Posts `activity` to `skill`, addressed to `skill_conversation_id`.
    ///
    /// The caller's activity is not modified. Transient statuses are retried
    /// with backoff; other failures are returned as they happen.
    #[instrument(
        skip_all,
        fields(
            skill_id = %skill.id,
            skill_conversation_id = %skill_conversation_id,
            activity_type = %activity.activity_type,
        )
    )]
    pub async fn post_activity(
        &self,
        skill_conversation_id: SkillConversationId,
        activity: &Activity,
        skill: &SkillDefinition,
    ) -> skillgate_core::Result<SkillResponse, SkillClientError> {
        let outgoing = self.outgoing_activity(skill_conversation_id, activity, skill);
        let scope = default_scope(&skill.app_id);

        let response = self
            .retry
            .retry(
                |attempt| {
                    debug!(attempt, endpoint = %skill.endpoint, "posting activity to skill");
                    self.send(&outgoing, skill, &scope)
                },
                |err: &AttemptError| err.transient,
            )
            .await
            .map_err(|err| err.error)?;

        debug!(status = response.status, "skill accepted activity");
        Ok(response)
    }

    fn outgoing_activity(
        &self,
        skill_conversation_id: SkillConversationId,
        activity: &Activity,
        skill: &SkillDefinition,
    ) -> Activity {
        let mut outgoing = activity.clone();

        if let Some(reference) = activity.conversation_reference() {
            if let Ok(relates_to) = serde_json::to_value(&reference) {
                outgoing.extra.insert("relatesTo".to_string(), relates_to);
            }
        }

        let mut conversation = activity
            .conversation
            .clone()
            .unwrap_or_else(|| ConversationAccount::new(""));
        conversation.id = skill_conversation_id.to_string();
        outgoing.conversation = Some(conversation);
        outgoing.service_url = Some(self.skill_host_endpoint.clone());
        outgoing.recipient = Some(ChannelAccount {
            role: Some("skill".to_string()),
            ..ChannelAccount::new(skill.app_id.clone())
        });
        if !self.host_app_id.is_empty() {
            outgoing.caller_id = Some(format!("{CALLER_ID_PREFIX}{}", self.host_app_id));
        }

        outgoing
    }

    async fn send(
        &self,
        activity: &Activity,
        skill: &SkillDefinition,
        scope: &str,
    ) -> Result<SkillResponse, AttemptError> {
        let mut request = self.http.post(&skill.endpoint).json(activity);

        if self.tokens.is_enabled() && !self.host_app_id.is_empty() {
            let token = self
                .tokens
                .get_token(scope)
                .await
                .map_err(|err| AttemptError::permanent(err.into()))?;
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.secret()));
        }

        let response = request.send().await.map_err(|err| {
            warn!(error = %err, "skill is unreachable");
            AttemptError {
                transient: err.is_connect(),
                error: SkillClientError::SkillUnreachable {
                    skill_id: skill.id.clone(),
                    reason: err.to_string(),
                },
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            AttemptError::permanent(SkillClientError::SkillUnreachable {
                skill_id: skill.id.clone(),
                reason: err.to_string(),
            })
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "skill rejected activity");
            let mut body = text;
            if body.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            return Err(AttemptError {
                transient: TRANSIENT_STATUSES.contains(&status),
                error: SkillClientError::SkillRejected {
                    skill_id: skill.id.clone(),
                    status: status.as_u16(),
                    body: (!body.is_empty()).then_some(body),
                },
            });
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str(&text) {
                Ok(body) => Some(body),
                Err(err) => {
                    debug!(error = %err, "skill response body is not JSON");
                    None
                }
            }
        };

        Ok(SkillResponse {
            status: status.as_u16(),
            body,
        })
    }
}
