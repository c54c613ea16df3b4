//! Task and download listings.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};

use crate::{ApiError, AppState, middleware::AuthUser};
use stratus_core::repository::RepoError;
use stratus_shared::types::{PageRequest, PageResponse};

/// Creates the task routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", delete(cancel_task))
        .route("/downloads", get(list_downloads))
}

/// GET `/tasks`
async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page.normalized();
    let (tasks, total) = state
        .deps
        .repos
        .tasks
        .list_by_user(auth.user_id(), page.offset(), page.limit())
        .await?;
    Ok(Json(PageResponse::new(tasks, page.page, page.per_page, total)))
}

/// DELETE `/tasks/{id}`
/// Cancels a queued or running job owned by the caller.
async fn cancel_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.deps.repos.tasks.find_by_id(id).await?;
    if task.user_id != auth.user_id() {
        return Err(RepoError::not_found(format!("task {id}")).into());
    }
    if !state.pool.cancel(id) {
        return Err(ApiError::validation("task is not running"));
    }
    tracing::info!(task_id = id, user_id = auth.user_id(), "task cancellation requested");
    Ok(StatusCode::ACCEPTED)
}

/// GET `/downloads`
async fn list_downloads(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<PageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = page.normalized();
    let (downloads, total) = state
        .deps
        .repos
        .downloads
        .list_by_user(auth.user_id(), page.offset(), page.limit())
        .await?;
    Ok(Json(PageResponse::new(downloads, page.page, page.per_page, total)))
}
