//! Client for a channel's connector service.
//!
//! Activities for a host conversation are sent to
//! `{serviceUrl}/v3/conversations/{conversationId}/activities`, authenticated
//! with a token for the channel's OAuth scope.

use crate::error::ConnectorError;
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::AUTHORIZATION;
use skillgate_conversation::{Activity, ConversationReference, ResourceResponse};
use skillgate_skills::TokenProvider;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Sends activities to channels.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Sends an activity to its conversation, as a reply when `replyToId` is set.
    async fn send_activity(
        &self,
        activity: &Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError>;

    /// Replaces a previously sent activity, identified by the activity's id.
    async fn update_activity(
        &self,
        activity: &Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError>;

    /// Deletes a previously sent activity.
    async fn delete_activity(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        oauth_scope: &str,
    ) -> Result<(), ConnectorError>;
}

/// `ChannelConnector` over HTTP.
pub struct HttpChannelConnector {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpChannelConnector {
    /// Creates a connector authenticating with `tokens`.
    #[must_use]
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http, tokens }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<&Activity>,
        oauth_scope: &str,
    ) -> Result<Option<ResourceResponse>, ConnectorError> {
        let mut request = self.http.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        if self.tokens.is_enabled() {
            let token = self.tokens.get_token(oauth_scope).await?;
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|err| ConnectorError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "channel rejected request");
            return Err(ConnectorError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Channels answer with a `ResourceResponse`, but some answer with nothing.
        Ok(response.json::<ResourceResponse>().await.ok())
    }
}

#[async_trait]
impl ChannelConnector for HttpChannelConnector {
    #[instrument(skip_all, fields(activity_type = %activity.activity_type))]
    async fn send_activity(
        &self,
        activity: &Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError> {
        let (service_url, conversation_id) = addressing(activity)?;
        let mut segments = vec!["v3", "conversations", conversation_id, "activities"];
        if let Some(reply_to_id) = activity.reply_to_id.as_deref() {
            segments.push(reply_to_id);
        }
        let url = endpoint(service_url, &segments)?;

        debug!(%url, "sending activity to channel");
        let response = self
            .request(reqwest::Method::POST, url, Some(activity), oauth_scope)
            .await?;
        Ok(response.unwrap_or_else(ResourceResponse::generated))
    }

    #[instrument(skip_all, fields(activity_type = %activity.activity_type))]
    async fn update_activity(
        &self,
        activity: &Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError> {
        let (service_url, conversation_id) = addressing(activity)?;
        let activity_id = activity
            .id
            .as_deref()
            .ok_or_else(|| ConnectorError::InvalidActivity {
                reason: "activity has no id".to_string(),
            })?;
        let url = endpoint(
            service_url,
            &["v3", "conversations", conversation_id, "activities", activity_id],
        )?;

        debug!(%url, "updating activity on channel");
        let response = self
            .request(reqwest::Method::PUT, url, Some(activity), oauth_scope)
            .await?;
        Ok(response.unwrap_or_else(|| ResourceResponse::new(activity_id)))
    }

    #[instrument(skip_all, fields(activity_id = %activity_id))]
    async fn delete_activity(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        oauth_scope: &str,
    ) -> Result<(), ConnectorError> {
        let url = endpoint(
            &reference.service_url,
            &[
                "v3",
                "conversations",
                reference.conversation.id.as_str(),
                "activities",
                activity_id,
            ],
        )?;

        debug!(%url, "deleting activity on channel");
        self.request(reqwest::Method::DELETE, url, None, oauth_scope)
            .await?;
        Ok(())
    }
}

fn addressing(activity: &Activity) -> Result<(&str, &str), ConnectorError> {
    let service_url = activity
        .service_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ConnectorError::InvalidActivity {
            reason: "activity has no service URL".to_string(),
        })?;
    let conversation_id = activity
        .conversation_id()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ConnectorError::InvalidActivity {
            reason: "activity has no conversation".to_string(),
        })?;
    Ok((service_url, conversation_id))
}

/// Appends percent-encoded path segments to a service URL.
fn endpoint(service_url: &str, segments: &[&str]) -> Result<Url, ConnectorError> {
    let invalid = |reason: String| ConnectorError::InvalidActivity {
        reason: format!("invalid service URL '{service_url}': {reason}"),
    };
    let mut url = Url::parse(service_url).map_err(|err| invalid(err.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
