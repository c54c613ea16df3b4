//! Directory listing and creation.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::user_fs;
use crate::{ApiError, AppState, middleware::AuthUser};
use stratus_core::filesystem::path;

/// Creates the directory routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/directory", get(list_root).put(create_directory))
        .route("/directory/{*path}", get(list_directory))
}

/// Request body of `PUT /directory`.
#[derive(Debug, Deserialize)]
pub struct CreateDirectoryRequest {
    /// Full virtual path of the new folder.
    pub path: String,
}

async fn list(state: &AppState, user_id: i64, dir: &str) -> Result<Json<Value>, ApiError> {
    let mut fs = user_fs(state, user_id).await?;
    let objects = fs.list(dir).await?;
    let parent = fs.dir_target.first().map(|f| f.id);
    Ok(Json(json!({
        "parent": parent,
        "objects": objects,
    })))
}

/// GET `/directory`
async fn list_root(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    list(&state, auth.user_id(), "/").await
}

/// GET `/directory/{*path}`
async fn list_directory(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(dir): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    list(&state, auth.user_id(), &path::clean(&format!("/{dir}"))).await
}

/// PUT `/directory`
/// Creates a folder and any missing parents.
async fn create_directory(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateDirectoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fs = user_fs(&state, auth.user_id()).await?;
    let folder = fs.create_directory(&path::clean(&req.path)).await?;
    tracing::debug!(user_id = auth.user_id(), folder_id = folder.id, path = %req.path, "directory created");
    Ok((StatusCode::CREATED, Json(json!({ "id": folder.id, "name": folder.name }))))
}
