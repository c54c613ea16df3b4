//! Storage backend callbacks that finalize client-side uploads.
//!
//! Each callback key maps to an upload session cached when the credential
//! was issued. Unknown or expired keys are rejected with 400.

use axum::{
    Json, Router,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, header::AUTHORIZATION},
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{ApiError, AppState};
use stratus_core::auth::HmacSigner;
use stratus_core::filesystem::{CallbackBody, UploadSession, load_session};
use stratus_core::model::{Policy, PolicyType};

/// Creates the callback routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/callback/remote/{key}", post(remote_callback))
        .route("/callback/s3/{key}", post(s3_callback))
        .route("/callback/azblob/{key}", post(azblob_callback))
}

/// Body posted by object storage once the client's upload landed.
#[derive(Debug, Deserialize)]
pub struct ObjectCallbackBody {
    /// Object key that was written.
    pub key: String,
    /// Entity tag of the object, checked against the stored one.
    #[serde(default)]
    pub etag: String,
}

/// Resolves the session and its policy, which must be of type `expected`.
async fn session_for(
    state: &AppState,
    key: &str,
    expected: PolicyType,
) -> Result<(UploadSession, Policy), ApiError> {
    let session = load_session(state.deps.cache.as_ref(), key)
        .await
        .ok_or_else(|| ApiError::validation("upload session does not exist or has expired"))?;
    let policy = state.deps.repos.policies.find_by_id(session.policy_id).await?;
    if policy.kind() != Some(expected) {
        return Err(ApiError::validation("callback does not match the session's policy"));
    }
    Ok((session, policy))
}

async fn finish(
    state: &AppState,
    session: &UploadSession,
    body: CallbackBody,
) -> Result<Json<Value>, ApiError> {
    let mut fs = state.deps.new_fs(session.uid).await?;
    let file = fs.process_callback(session, body).await?;
    tracing::info!(user_id = session.uid, file_id = file.id, key = %session.key, "upload callback processed");
    Ok(Json(json!({ "id": file.id, "name": file.name, "size": file.size })))
}

/// POST `/callback/remote/{key}`
/// Signed by the peer with the policy's secret.
async fn remote_callback(
    State(state): State<AppState>,
    Path(key): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let (session, policy) = session_for(&state, &key, PolicyType::Remote).await?;

    let authorization = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
    HmacSigner::new(&policy.secret_key)
        .check_request(uri.path(), None, &body, authorization)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let callback: CallbackBody = serde_json::from_str(&body)
        .map_err(|e| ApiError::validation(format!("invalid callback body: {e}")))?;
    finish(&state, &session, callback).await
}

fn check_object_key(session: &UploadSession, body: &ObjectCallbackBody) -> Result<(), ApiError> {
    if body.key != session.save_path {
        return Err(ApiError::validation("callback key does not match the upload session"));
    }
    Ok(())
}

/// Verifies the stored object against the session before recording it.
/// Nothing the notification claims about size is trusted.
async fn finish_object(
    state: &AppState,
    session: &UploadSession,
    body: ObjectCallbackBody,
) -> Result<Json<Value>, ApiError> {
    check_object_key(session, &body)?;
    let mut fs = state.deps.new_fs(session.uid).await?;
    let callback = fs.verify_stored_object(session, &body.etag).await?;
    let file = fs.process_callback(session, callback).await?;
    tracing::info!(user_id = session.uid, file_id = file.id, key = %session.key, "object callback processed");
    Ok(Json(json!({ "id": file.id, "name": file.name, "size": file.size })))
}

/// POST `/callback/s3/{key}`
async fn s3_callback(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ObjectCallbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, _) = session_for(&state, &key, PolicyType::S3).await?;
    finish_object(&state, &session, body).await
}

/// POST `/callback/azblob/{key}`
async fn azblob_callback(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<ObjectCallbackBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, _) = session_for(&state, &key, PolicyType::Azblob).await?;
    finish_object(&state, &session, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> UploadSession {
        UploadSession {
            key: "cb".to_string(),
            uid: 1,
            policy_id: 2,
            virtual_path: "/docs".to_string(),
            name: "a.txt".to_string(),
            size: 10,
            save_path: "1/a.txt".to_string(),
        }
    }

    #[test]
    fn test_object_callback_requires_matching_key() {
        let body = ObjectCallbackBody {
            key: "1/other.txt".to_string(),
            etag: "x".to_string(),
        };
        assert!(check_object_key(&session(), &body).is_err());

        let body = ObjectCallbackBody {
            key: "1/a.txt".to_string(),
            etag: String::new(),
        };
        assert!(check_object_key(&session(), &body).is_ok());
    }

    #[test]
    fn test_object_callback_body_tolerates_size_field() {
        let body: ObjectCallbackBody =
            serde_json::from_str(r#"{"key":"1/a.txt","etag":"e","size":1}"#).expect("json");
        assert_eq!(body.key, "1/a.txt");
        assert_eq!(body.etag, "e");
    }
}
