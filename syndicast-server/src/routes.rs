//! HTTP route handlers
//!
//! The OAuth callback is the one endpoint that never returns an error
//! body: whatever happens, the browser gets a 302 aimed at the caller's
//! return origin (or the configured app origin) with the result encoded in
//! the query string.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use libsyndicast::oauth::{CallbackParams, PasswordConnectRequest};
use libsyndicast::{
    ConnectService, DispatchOutcome, Dispatcher, Platform, RefreshManager, Scheduler,
    SyndicastError,
};
use libsyndicast::refresh::RefreshOutcome;

#[derive(Clone)]
pub struct AppState {
    pub connect: ConnectService,
    pub dispatcher: Dispatcher,
    pub refresher: RefreshManager,
    pub scheduler: Scheduler,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/oauth/:platform/start", get(oauth_start))
        .route("/oauth/:platform/callback", get(oauth_callback))
        .route("/oauth/bluesky/connect", post(bluesky_connect))
        .route("/publish", post(publish))
        .route("/refresh", post(refresh))
        .route("/scheduler/tick", post(scheduler_tick))
        .route("/healthz", get(healthz))
        .with_state(state)
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn parse_platform(raw: &str) -> Result<Platform, Response> {
    Platform::from_str(raw)
        .map_err(|e| error_body(StatusCode::NOT_FOUND, e))
}

fn internal_error(e: SyndicastError) -> Response {
    tracing::error!("Request failed: {}", e);
    error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Deserialize)]
struct StartQuery {
    user_id: String,
    return_origin: String,
    email: String,
    timezone: String,
}

/// Start an OAuth redirect handshake: 302 to the platform consent screen.
async fn oauth_start(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(query): Query<StartQuery>,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(platform) => platform,
        Err(response) => return response,
    };

    match state
        .connect
        .begin_authorization(
            platform,
            query.user_id,
            query.return_origin,
            query.email,
            query.timezone,
        )
        .await
    {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(SyndicastError::InvalidInput(message)) => {
            error_body(StatusCode::BAD_REQUEST, message)
        }
        Err(SyndicastError::Config(e)) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => internal_error(e),
    }
}

/// Platform redirect target. Always answers with a 302.
async fn oauth_callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(platform) => platform,
        Err(response) => return response,
    };

    let redirect = state.connect.complete_callback(platform, params).await;
    Redirect::temporary(&redirect).into_response()
}

/// Direct app-password connect for Bluesky.
async fn bluesky_connect(
    State(state): State<AppState>,
    Json(request): Json<PasswordConnectRequest>,
) -> Response {
    match state
        .connect
        .connect_with_password(Platform::Bluesky, request)
        .await
    {
        Ok(credential) => (
            StatusCode::OK,
            Json(json!({
                "message": "channel connected",
                "credential_id": credential.id,
                "handle": credential.handle,
                "platform_account_id": credential.platform_account_id,
            })),
        )
            .into_response(),
        Err(SyndicastError::Publish(libsyndicast::PublishError::Unauthorized(message))) => {
            error_body(StatusCode::UNAUTHORIZED, message)
        }
        Err(SyndicastError::Publish(e)) => error_body(StatusCode::BAD_GATEWAY, e.to_string()),
        Err(SyndicastError::Config(e)) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => internal_error(e),
    }
}

#[derive(Deserialize)]
struct PublishRequest {
    post_id: String,
}

/// Dispatch one post immediately.
async fn publish(State(state): State<AppState>, Json(request): Json<PublishRequest>) -> Response {
    match state.dispatcher.dispatch(&request.post_id).await {
        Ok(outcome) => dispatch_response(outcome),
        Err(SyndicastError::InvalidInput(message)) => {
            error_body(StatusCode::NOT_FOUND, message)
        }
        Err(e) => internal_error(e),
    }
}

/// Success, duplicate absorption, and idempotent re-delivery all read as
/// 200 to the caller; only a recorded failure is surfaced as an error.
fn dispatch_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Sent {
            remote_post_id,
            detail,
        } => (
            StatusCode::OK,
            Json(json!({
                "message": "post sent",
                "remote_post_id": remote_post_id,
                "status": detail.as_str(),
            })),
        )
            .into_response(),
        DispatchOutcome::SkippedDuplicate { detail } => (
            StatusCode::OK,
            Json(json!({
                "message": "duplicate content, post skipped",
                "status": detail.as_str(),
            })),
        )
            .into_response(),
        DispatchOutcome::AlreadyConcluded => (
            StatusCode::OK,
            Json(json!({ "message": "post already concluded" })),
        )
            .into_response(),
        DispatchOutcome::Failed { detail, message } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "dispatch failed",
                "status": detail.as_str(),
                "details": message,
            })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct RefreshRequest {
    credential_id: String,
}

/// Run one refresh-token grant for a credential.
async fn refresh(State(state): State<AppState>, Json(request): Json<RefreshRequest>) -> Response {
    match state.refresher.refresh(&request.credential_id).await {
        Ok(RefreshOutcome::Refreshed(_)) => (
            StatusCode::OK,
            Json(json!({ "message": "token refreshed" })),
        )
            .into_response(),
        Ok(RefreshOutcome::Failed(message)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "refresh failed, credential deactivated",
                "details": message,
            })),
        )
            .into_response(),
        Err(SyndicastError::InvalidInput(message)) => {
            error_body(StatusCode::NOT_FOUND, message)
        }
        Err(e) => internal_error(e),
    }
}

/// Trigger a sweep outside the poll cadence.
async fn scheduler_tick(State(state): State<AppState>) -> Response {
    match state.scheduler.sweep(chrono::Utc::now()).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "candidates_found": summary.candidates_found,
                "due_after_timezone_filter": summary.due,
                "dispatched_ok": summary.dispatched_ok,
                "dispatch_failed": summary.dispatch_failed,
            })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn healthz() -> &'static str {
    "ok"
}
