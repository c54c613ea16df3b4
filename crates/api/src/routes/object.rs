//! Batch operations on folders and files.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;

use super::{file::ItemSelection, user_fs};
use crate::{ApiError, AppState, middleware::AuthUser};
use stratus_core::filesystem::path;

/// Creates the object routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/object/copy", post(copy))
        .route("/object/move", post(move_objects))
        .route("/object/rename", post(rename))
        .route("/object/delete", post(delete))
}

/// Request body of copy and move.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    /// Directory the objects currently live in.
    pub src_dir: String,
    /// Objects to copy or move.
    pub src: ItemSelection,
    /// Destination directory.
    pub dst: String,
}

/// Request body of `POST /object/rename`.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// The single object to rename.
    pub src: ItemSelection,
    /// New name.
    pub new_name: String,
}

/// Request body of `POST /object/delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    /// Folder IDs.
    #[serde(default)]
    pub dirs: Vec<i64>,
    /// File IDs.
    #[serde(default)]
    pub items: Vec<i64>,
    /// Drop rows even when physical deletion fails.
    #[serde(default)]
    pub force: bool,
}

/// POST `/object/copy`
async fn copy(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut fs = user_fs(&state, auth.user_id()).await?;
    fs.copy(
        &req.src.dirs,
        &req.src.items,
        &path::clean(&req.src_dir),
        &path::clean(&req.dst),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/object/move`
async fn move_objects(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<TransferRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fs = user_fs(&state, auth.user_id()).await?;
    fs.move_objects(
        &req.src.dirs,
        &req.src.items,
        &path::clean(&req.src_dir),
        &path::clean(&req.dst),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/object/rename`
async fn rename(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.src.dirs.len() + req.src.items.len() != 1 {
        return Err(ApiError::validation("exactly one object can be renamed at a time"));
    }
    let fs = user_fs(&state, auth.user_id()).await?;
    fs.rename(&req.src.dirs, &req.src.items, &req.new_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/object/delete`
async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DeleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut fs = user_fs(&state, auth.user_id()).await?;
    fs.delete(&req.dirs, &req.items, req.force).await?;
    tracing::info!(
        user_id = auth.user_id(),
        dirs = req.dirs.len(),
        files = req.items.len(),
        "objects deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
