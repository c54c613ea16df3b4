//! Offline download routes and the daemon push endpoint.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
    routing::{delete, post, put},
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::{ApiError, AppState, middleware::AuthUser};
use stratus_core::aria2::Event;
use stratus_core::filesystem::path;

/// Creates the authenticated offline download routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/aria2/url", post(add_url))
        .route("/aria2/task/{id}", delete(cancel))
        .route("/aria2/select/{id}", put(select))
}

/// Creates the push endpoint used by the daemon.
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/aria2/events", post(events))
}

/// Request body of `POST /aria2/url`.
#[derive(Debug, Deserialize, Validate)]
pub struct AddUrlRequest {
    /// Source URL or magnet link.
    #[validate(url)]
    pub url: String,
    /// Destination folder.
    pub dst: String,
}

/// Request body of `PUT /aria2/select/{id}`.
#[derive(Debug, Deserialize, Validate)]
pub struct SelectRequest {
    /// 1-based file indexes to keep.
    #[validate(length(min = 1, message = "select at least one file"))]
    pub indexes: Vec<i64>,
}

/// A JSON-RPC notification relayed from the daemon.
#[derive(Debug, Deserialize)]
pub struct EventNotification {
    /// Notification name, e.g. `aria2.onDownloadComplete`.
    pub method: String,
    /// Affected jobs.
    #[serde(default)]
    pub params: Vec<Event>,
}

/// POST `/aria2/url`
async fn add_url(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AddUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let user = state.deps.repos.users.find_by_id(auth.user_id()).await?;
    let download = state
        .aria2
        .add_url(&user, &req.url, &path::clean(&req.dst))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": download.id,
            "gid": download.gid,
        })),
    ))
}

/// DELETE `/aria2/task/{id}`
async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let download = state
        .deps
        .repos
        .downloads
        .find_by_id(id, auth.user_id())
        .await?;
    state.aria2.cancel(&download).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT `/aria2/select/{id}`
async fn select(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SelectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let download = state
        .deps
        .repos
        .downloads
        .find_by_id(id, auth.user_id())
        .await?;
    state.aria2.select(&download, &req.indexes).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/aria2/events`
/// Routes a daemon notification to the monitors. When `aria2_token` is set,
/// the relay must present it as a bearer token.
async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(notification): Json<EventNotification>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.deps.settings.get("aria2_token").await;
    if !token.is_empty() {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));
        if presented != Some(token.as_str()) {
            return Err(ApiError::unauthorized("invalid aria2 token"));
        }
    }

    if !state
        .aria2
        .notifier()
        .dispatch(&notification.method, &notification.params)
    {
        return Err(ApiError::validation(format!(
            "unknown notification: {}",
            notification.method
        )));
    }
    tracing::debug!(method = %notification.method, events = notification.params.len(), "aria2 event dispatched");
    Ok(StatusCode::NO_CONTENT)
}
