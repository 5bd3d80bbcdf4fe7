//! Test doubles shared by the server's unit tests.

use crate::adapter::BotAdapter;
use crate::connector::ChannelConnector;
use crate::error::ConnectorError;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value as JsonValue;
use skillgate_auth::Claims;
use skillgate_conversation::{
    Activity, ChannelAccount, ConversationAccount, ConversationIdFactory, ConversationReference,
    MemorySkillConversationStore, ResourceResponse, SkillConversationIdFactory,
    end_of_conversation_codes,
};
use skillgate_skills::{NoAuthTokenProvider, RetryPolicy, SkillDefinition, SkillHttpClient};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub const SERVICE_URL: &str = "https://channel.example/";
pub const CHANNEL_SCOPE: &str = "channel-scope";

/// A message from user `user-1` to `host-bot` on channel `test`.
pub fn channel_activity(conversation_id: &str, text: &str) -> Activity {
    let mut activity = Activity::message(text);
    activity.id = Some(format!("{conversation_id}-activity"));
    activity.channel_id = Some("test".to_string());
    activity.service_url = Some(SERVICE_URL.to_string());
    activity.from = Some(ChannelAccount::new("user-1"));
    activity.recipient = Some(ChannelAccount::new("host-bot"));
    activity.conversation = Some(ConversationAccount::new(conversation_id));
    activity
}

pub fn memory_id_factory() -> Arc<SkillConversationIdFactory> {
    Arc::new(SkillConversationIdFactory::new(Arc::new(
        MemorySkillConversationStore::new(),
    )))
}

pub fn skill_client(id_factory: Arc<dyn ConversationIdFactory>) -> SkillHttpClient {
    SkillHttpClient::new(
        reqwest::Client::new(),
        Arc::new(NoAuthTokenProvider),
        id_factory,
        "",
        "http://localhost:3978/api/skills",
    )
    .with_retry(RetryPolicy::no_retry())
}

pub fn memory_skill_client() -> SkillHttpClient {
    skill_client(memory_id_factory())
}

/// Connector that records what it is asked to send.
#[derive(Default)]
pub struct RecordingConnector {
    sent: Mutex<Vec<(Activity, String)>>,
    updated: Mutex<Vec<Activity>>,
    deleted: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingConnector {
    pub async fn sent(&self) -> Vec<Activity> {
        self.sent.lock().await.iter().map(|(a, _)| a.clone()).collect()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|(a, _)| a.text.clone())
            .collect()
    }

    pub async fn scopes(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, s)| s.clone()).collect()
    }

    pub async fn updated(&self) -> Vec<Activity> {
        self.updated.lock().await.clone()
    }

    pub async fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().await.clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ConnectorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ConnectorError::Rejected {
                url: SERVICE_URL.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelConnector for RecordingConnector {
    async fn send_activity(
        &self,
        activity: &Activity,
        oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError> {
        self.check()?;
        let mut sent = self.sent.lock().await;
        sent.push((activity.clone(), oauth_scope.to_string()));
        Ok(ResourceResponse::new(format!("sent-{}", sent.len())))
    }

    async fn update_activity(
        &self,
        activity: &Activity,
        _oauth_scope: &str,
    ) -> Result<ResourceResponse, ConnectorError> {
        self.check()?;
        self.updated.lock().await.push(activity.clone());
        Ok(ResourceResponse::new(activity.id.clone().unwrap_or_default()))
    }

    async fn delete_activity(
        &self,
        reference: &ConversationReference,
        activity_id: &str,
        _oauth_scope: &str,
    ) -> Result<(), ConnectorError> {
        self.check()?;
        self.deleted
            .lock()
            .await
            .push((reference.conversation.id.clone(), activity_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct SkillBehaviour {
    received: Vec<Activity>,
    status: Option<u16>,
    body: Option<JsonValue>,
    callback: Option<Arc<dyn BotAdapter>>,
}

/// A skill served on a local port.
#[derive(Clone)]
pub struct SkillServer {
    endpoint: String,
    behaviour: Arc<Mutex<SkillBehaviour>>,
}

impl SkillServer {
    pub async fn start() -> Self {
        let behaviour = Arc::new(Mutex::new(SkillBehaviour::default()));
        let app = Router::new()
            .route("/api/messages", post(receive))
            .with_state(Arc::clone(&behaviour));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            endpoint: format!("http://{addr}/api/messages"),
            behaviour,
        }
    }

    pub fn definition(&self, id: &str) -> SkillDefinition {
        SkillDefinition::new(id, format!("{id}-app"), self.endpoint.clone())
    }

    pub async fn received(&self) -> Vec<Activity> {
        self.behaviour.lock().await.received.clone()
    }

    pub async fn fail_with(&self, status: u16) {
        self.behaviour.lock().await.status = Some(status);
    }

    pub async fn reply_with(&self, body: JsonValue) {
        self.behaviour.lock().await.body = Some(body);
    }

    /// Before answering, end the conversation through `adapter` as a skill would.
    pub async fn call_back_with(&self, adapter: Arc<dyn BotAdapter>) {
        self.behaviour.lock().await.callback = Some(adapter);
    }
}

async fn receive(
    State(behaviour): State<Arc<Mutex<SkillBehaviour>>>,
    Json(activity): Json<Activity>,
) -> Response {
    let (status, body, callback) = {
        let mut behaviour = behaviour.lock().await;
        behaviour.received.push(activity.clone());
        (
            behaviour.status.unwrap_or(200),
            behaviour.body.clone(),
            behaviour.callback.clone(),
        )
    };

    let relates_to = activity
        .extra
        .get("relatesTo")
        .and_then(|value| serde_json::from_value::<ConversationReference>(value.clone()).ok());
    if let (Some(adapter), Some(reference)) = (callback, relates_to) {
        if !activity.is_end_of_conversation() {
            let mut end = Activity::end_of_conversation(end_of_conversation_codes::COMPLETED_SUCCESSFULLY);
            end.apply_conversation_reference(&reference, true);
            adapter
                .continue_conversation(Claims::anonymous_skill(), &reference, end, CHANNEL_SCOPE)
                .await
                .unwrap();
        }
    }

    let status = StatusCode::from_u16(status).unwrap();
    match body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}
