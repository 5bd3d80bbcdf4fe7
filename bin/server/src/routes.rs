//! HTTP routes.
//!
//! - `POST /api/messages`: activities from channels
//! - `/api/skills/v3/conversations/...`: callbacks from skills
//! - `GET /health`: liveness

use crate::adapter::InvokeResponse;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::log_activity;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use axum_extra::typed_header::TypedHeaderRejection;
use serde_json::json;
use skillgate_auth::AuthenticationError;
use skillgate_conversation::{Activity, ResourceResponse};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Prefix of the channel-service API served to skills.
pub const SKILLS_PREFIX: &str = "/api/skills/";

type BearerHeader = Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>;
type ActivityBody = Result<Json<Activity>, JsonRejection>;

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/messages", post(messages))
        .route(
            "/api/skills/v3/conversations/{conversation_id}/activities",
            post(send_to_conversation).fallback(unsupported),
        )
        .route(
            "/api/skills/v3/conversations/{conversation_id}/activities/{activity_id}",
            post(reply_to_activity)
                .put(update_activity)
                .delete(delete_activity)
                .fallback(unsupported),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(log_activity)),
        )
        .with_state(state)
}

/// Returns the bearer token, `None` when no `Authorization` header was sent.
fn bearer_token(header: &BearerHeader) -> Result<Option<&str>, ApiError> {
    match header {
        Ok(TypedHeader(Authorization(bearer))) => Ok(Some(bearer.token())),
        Err(rejection) if rejection.is_missing() => Ok(None),
        Err(rejection) => Err(AuthenticationError::InvalidToken {
            reason: rejection.to_string(),
        }
        .into()),
    }
}

async fn messages(
    State(state): State<AppState>,
    authorization: BearerHeader,
    body: ActivityBody,
) -> Result<Response, ApiError> {
    let token = bearer_token(&authorization)?;
    let claims = state.channel_validator.validate(token).await?;
    let Json(activity) = body?;
    claims.verify_service_url(activity.service_url.as_deref())?;

    let response = state.adapter.process_activity(claims, activity).await?;
    Ok(invoke_response(response))
}

fn invoke_response(response: InvokeResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

async fn send_to_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    authorization: BearerHeader,
    body: ActivityBody,
) -> Result<Json<ResourceResponse>, ApiError> {
    let token = bearer_token(&authorization)?;
    let claims = state.skill_handler.authenticate(token).await?;
    let Json(activity) = body?;
    let response = state
        .skill_handler
        .send_to_conversation(claims, &conversation_id, activity)
        .await?;
    Ok(Json(response))
}

async fn reply_to_activity(
    State(state): State<AppState>,
    Path((conversation_id, activity_id)): Path<(String, String)>,
    authorization: BearerHeader,
    body: ActivityBody,
) -> Result<Json<ResourceResponse>, ApiError> {
    let token = bearer_token(&authorization)?;
    let claims = state.skill_handler.authenticate(token).await?;
    let Json(activity) = body?;
    let response = state
        .skill_handler
        .reply_to_activity(claims, &conversation_id, &activity_id, activity)
        .await?;
    Ok(Json(response))
}

async fn update_activity(
    State(state): State<AppState>,
    Path((conversation_id, activity_id)): Path<(String, String)>,
    authorization: BearerHeader,
    body: ActivityBody,
) -> Result<Json<ResourceResponse>, ApiError> {
    let token = bearer_token(&authorization)?;
    let claims = state.skill_handler.authenticate(token).await?;
    let Json(activity) = body?;
    let response = state
        .skill_handler
        .update_activity(claims, &conversation_id, &activity_id, activity)
        .await?;
    Ok(Json(response))
}

async fn delete_activity(
    State(state): State<AppState>,
    Path((conversation_id, activity_id)): Path<(String, String)>,
    authorization: BearerHeader,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&authorization)?;
    let claims = state.skill_handler.authenticate(token).await?;
    state
        .skill_handler
        .delete_activity(claims, &conversation_id, &activity_id)
        .await?;
    Ok(StatusCode::OK)
}

async fn unsupported(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    authorization: BearerHeader,
) -> ApiError {
    let token = match bearer_token(&authorization) {
        Ok(token) => token,
        Err(err) => return err,
    };
    let operation = format!("{method} {}", uri.path());
    state.skill_handler.unsupported(token, &operation).await.into()
}

async fn not_found(
    state: State<AppState>,
    method: Method,
    uri: Uri,
    authorization: BearerHeader,
) -> Response {
    if uri.path().starts_with(SKILLS_PREFIX) {
        return unsupported(state, method, uri, authorization)
            .await
            .into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
