//! File content routes: streamed uploads, client-side upload credentials,
//! thumbnails, source links and archive jobs.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
};
use axum_extra::TypedHeader;
use axum_extra::headers::ContentLength;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::user_fs;
use crate::{ApiError, AppState, middleware::AuthUser};
use stratus_core::driver::{ByteStream, ContentResponse};
use stratus_core::filesystem::{FsError, is_legal_name, path};
use stratus_core::task::{CompressJob, CompressProps, DecompressJob, DecompressProps, Job};

/// Creates the file routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/file/upload", put(upload))
        .route("/file/upload/credential", get(upload_credential))
        .route("/file/thumb/{id}", get(thumb))
        .route("/file/source/{id}", get(source))
        .route("/file/compress", post(compress))
        .route("/file/decompress", post(decompress))
}

// ============================================================================
// Request Types
// ============================================================================

/// Query of an upload credential request.
#[derive(Debug, Deserialize)]
pub struct CredentialQuery {
    /// Destination directory.
    pub path: String,
    /// Declared size in bytes.
    pub size: u64,
    /// File name.
    pub name: String,
}

/// Selection of folders and files.
#[derive(Debug, Default, Deserialize)]
pub struct ItemSelection {
    /// Folder IDs.
    #[serde(default)]
    pub dirs: Vec<i64>,
    /// File IDs.
    #[serde(default)]
    pub items: Vec<i64>,
}

/// Request body of `POST /file/compress`.
#[derive(Debug, Deserialize, Validate)]
pub struct CompressRequest {
    /// Objects to pack.
    pub src: ItemSelection,
    /// Directory the archive is stored in.
    #[validate(length(min = 1))]
    pub dst: String,
    /// Archive name.
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

/// Request body of `POST /file/decompress`.
#[derive(Debug, Deserialize)]
pub struct DecompressRequest {
    /// Virtual path of the archive.
    pub src: String,
    /// Directory to extract into.
    pub dst: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decodes a percent-encoded header value.
fn decode_header(raw: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", raw.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Turns a backend delivery into a response cached for `max_age` seconds.
pub(crate) fn content_response(content: ContentResponse, max_age: i64) -> Response {
    let cache_control = format!("private, max-age={}", max_age.max(0));
    match content {
        ContentResponse::Redirect(url) => (
            [(header::CACHE_CONTROL, cache_control)],
            Redirect::to(&url),
        )
            .into_response(),
        ContentResponse::Stream(stream) => (
            [(header::CACHE_CONTROL, cache_control)],
            Body::from_stream(ReaderStream::new(stream)),
        )
            .into_response(),
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// PUT `/file/upload`
/// Streams the body into `X-Path`/`X-FileName`.
async fn upload(
    State(state): State<AppState>,
    auth: AuthUser,
    content_length: Option<TypedHeader<ContentLength>>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let TypedHeader(ContentLength(size)) =
        content_length.ok_or_else(|| ApiError::validation("Content-Length header is required"))?;
    let dir = header_str(&headers, "X-Path")
        .map(decode_header)
        .ok_or_else(|| ApiError::validation("X-Path header is required"))?;
    let name = header_str(&headers, "X-FileName")
        .map(decode_header)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::validation("X-FileName header is required"))?;

    let stream: ByteStream = Box::pin(StreamReader::new(
        body.into_data_stream().map_err(std::io::Error::other),
    ));

    // Dropping the request future cancels everything derived from the token.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let mut fs = user_fs(&state, auth.user_id()).await?;
    let dst = path::join(&[dir.as_str(), name.as_str()]);
    let file = fs.upload_from_stream(stream, &dst, size, &cancel, false).await?;

    tracing::info!(user_id = auth.user_id(), file_id = file.id, path = %dst, "file uploaded");
    Ok((
        StatusCode::OK,
        Json(json!({
            "id": file.id,
            "name": file.name,
            "size": file.size,
        })),
    ))
}

/// GET `/file/upload/credential`
/// Issues a credential for a client-side upload.
async fn upload_credential(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CredentialQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut fs = user_fs(&state, auth.user_id()).await?;
    let credential = fs
        .get_upload_token(&path::clean(&query.path), query.size, &query.name)
        .await?;
    Ok(Json(credential))
}

/// GET `/file/thumb/{id}`
async fn thumb(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let mut fs = user_fs(&state, auth.user_id()).await?;
    let thumb = fs.get_thumb(id).await?;
    Ok(content_response(thumb.content, thumb.max_age))
}

/// GET `/file/source/{id}`
async fn source(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let mut fs = user_fs(&state, auth.user_id()).await?;
    let url = fs.get_source(id).await?;
    Ok(Json(json!({ "url": url })))
}

/// POST `/file/compress`
/// Queues a compress job.
async fn compress(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CompressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    if !is_legal_name(&req.name) {
        return Err(ApiError::validation("illegal archive name"));
    }
    if req.src.dirs.is_empty() && req.src.items.is_empty() {
        return Err(ApiError::validation("nothing to compress"));
    }

    let fs = user_fs(&state, auth.user_id()).await?;
    if fs.is_path_exist(&req.dst).await?.is_none() {
        return Err(FsError::PathNotExist.into());
    }

    let props = CompressProps {
        dirs: req.src.dirs,
        files: req.src.items,
        dst: path::join(&[req.dst.as_str(), req.name.as_str()]),
    };
    let job = CompressJob::create(&state.deps, auth.user_id(), props).await?;
    let task_id = job.model().id;
    state.pool.submit(Box::new(job));

    tracing::info!(user_id = auth.user_id(), task_id, "compress job queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))))
}

/// POST `/file/decompress`
/// Queues a decompress job.
async fn decompress(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<DecompressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let fs = user_fs(&state, auth.user_id()).await?;
    if fs.is_file_exist(&req.src).await?.is_none() {
        return Err(FsError::ObjectNotExist.into());
    }
    if fs.is_path_exist(&req.dst).await?.is_none() {
        return Err(FsError::PathNotExist.into());
    }

    let props = DecompressProps {
        src: path::clean(&req.src),
        dst: path::clean(&req.dst),
    };
    let job = DecompressJob::create(&state.deps, auth.user_id(), props).await?;
    let task_id = job.model().id;
    state.pool.submit(Box::new(job));

    tracing::info!(user_id = auth.user_id(), task_id, "decompress job queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": task_id }))))
}
