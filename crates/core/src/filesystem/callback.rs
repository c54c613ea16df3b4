//! Client-side uploads: credentials, sessions and callback finalization.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::context::{FileHeader, UploadContext};
use super::hooks::{Hook, HookPoint};
use super::{FileSystem, FsError};
use crate::driver::{UploadCredential, normalize_etag};
use crate::model::{File, random_string};

/// Cache key prefix of upload sessions.
pub const CALLBACK_SESSION_PREFIX: &str = "callback_";

const CALLBACK_KEY_LEN: usize = 32;

/// Pending client-side upload, cached until its callback arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Callback key.
    pub key: String,
    /// Uploader.
    pub uid: i64,
    /// Policy the credential was issued for.
    pub policy_id: i64,
    /// Destination directory.
    pub virtual_path: String,
    /// Display name.
    pub name: String,
    /// Declared size.
    pub size: u64,
    /// Pre-generated physical key.
    pub save_path: String,
}

/// Body reported by the storage backend once the client finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackBody {
    /// Name as reported by the backend.
    #[serde(default)]
    pub name: String,
    /// Physical key; falls back to the session's save path when empty.
    #[serde(default)]
    pub source_name: String,
    /// Image dimensions, `"w,h"` or empty.
    #[serde(default)]
    pub pic_info: String,
    /// Stored size.
    #[serde(default)]
    pub size: u64,
}

impl FileSystem {
    /// Issues a client-side upload credential and caches the session the
    /// callback will be matched against.
    pub async fn get_upload_token(
        &mut self,
        dir: &str,
        size: u64,
        name: &str,
    ) -> Result<UploadCredential, FsError> {
        self.switch_policy(self.user.policy.clone())?;
        if !self.validate_file_size(size) {
            return Err(FsError::FileSizeTooBig);
        }

        let settings = &self.deps.settings;
        let credential_ttl = settings.get_int("upload_credential_timeout", 3600).await;
        let session_ttl = settings.get_u64("upload_session_timeout", 86400).await;

        let key = random_string(CALLBACK_KEY_LEN);
        let save_path = self.generate_save_path(&FileHeader::new(name, size, dir));
        let credential = self.handler.token(credential_ttl, &key, &save_path).await?;

        let session = UploadSession {
            key: key.clone(),
            uid: self.user.id,
            policy_id: self.policy.id,
            virtual_path: dir.to_string(),
            name: name.to_string(),
            size,
            save_path,
        };
        self.deps
            .cache
            .set_as(
                &format!("{CALLBACK_SESSION_PREFIX}{key}"),
                &session,
                Some(Duration::from_secs(session_ttl)),
            )
            .await
            .map_err(|e| FsError::internal(e.to_string()))?;

        tracing::debug!(user_id = self.user.id, key = %key, "upload session created");
        Ok(credential)
    }

    /// Checks the object a client wrote straight to storage against its
    /// session and returns the callback body to record.
    ///
    /// The stored size must equal the declared one, and a reported entity tag
    /// must equal the stored one when the backend has one. A mismatching
    /// object is removed. The recorded size is always the session's.
    pub async fn verify_stored_object(
        &mut self,
        session: &UploadSession,
        reported_etag: &str,
    ) -> Result<CallbackBody, FsError> {
        self.switch_policy_by_id(session.policy_id).await?;
        let meta = self.handler.meta(&session.save_path).await?;

        let reported = normalize_etag(reported_etag);
        let mismatch = if meta.size != session.size {
            Some(format!("size {} != declared {}", meta.size, session.size))
        } else {
            match meta.etag.as_deref() {
                Some(stored) if !reported.is_empty() && stored != reported => {
                    Some(format!("etag {reported} != stored {stored}"))
                }
                _ => None,
            }
        };

        if let Some(detail) = mismatch {
            tracing::warn!(
                user_id = session.uid,
                key = %session.key,
                path = %session.save_path,
                detail = %detail,
                "rejecting upload callback"
            );
            if let Err(e) = self.handler.delete(&[session.save_path.clone()]).await {
                tracing::warn!(path = %session.save_path, error = %e, "failed to remove mismatched object");
            }
            return Err(FsError::ObjectMismatch(detail));
        }

        Ok(CallbackBody {
            name: session.name.clone(),
            source_name: session.save_path.clone(),
            pic_info: String::new(),
            size: session.size,
        })
    }

    /// Records the file of a finished client-side upload and drops its
    /// session. Bytes already stored are removed when validation fails.
    pub async fn process_callback(
        &mut self,
        session: &UploadSession,
        body: CallbackBody,
    ) -> Result<File, FsError> {
        self.switch_policy_by_id(session.policy_id).await?;
        self.user.policy = self.policy.clone();

        let save_path = if body.source_name.is_empty() {
            session.save_path.clone()
        } else {
            body.source_name.clone()
        };
        let parent = self.ensure_directory(&session.virtual_path).await?;

        self.use_hook(HookPoint::BeforeAddFile, Hook::ValidateFile);
        self.use_hook(HookPoint::BeforeAddFile, Hook::ValidateCapacity);
        self.use_hook(HookPoint::AfterValidateFailed, Hook::GiveBackCapacity);
        self.use_hook(HookPoint::AfterValidateFailed, Hook::DeleteTempFile);
        self.use_hook(HookPoint::BeforeAddFileFailed, Hook::DeleteTempFile);

        let header = FileHeader::new(session.name.clone(), body.size, session.virtual_path.clone());
        let mut ctx = UploadContext::new(header, &CancellationToken::new()).with_save_path(save_path);
        let mut file = self.add_file(&mut ctx, &parent).await?;

        if !body.pic_info.is_empty() {
            self.deps
                .repos
                .files
                .update_pic_info(file.id, &body.pic_info)
                .await?;
            file.pic_info = body.pic_info;
        }

        self.deps
            .cache
            .delete(&[session.key.clone()], CALLBACK_SESSION_PREFIX)
            .await;
        Ok(file)
    }
}

/// Looks up a cached upload session by callback key.
pub async fn load_session(
    cache: &dyn crate::cache::CacheStore,
    key: &str,
) -> Option<UploadSession> {
    cache
        .get_as(&format!("{CALLBACK_SESSION_PREFIX}{key}"))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};

    #[tokio::test]
    async fn test_upload_token_caches_session() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;

        let credential = fs.get_upload_token("/docs", 10, "a.txt").await.expect("token");
        let key = credential.callback.rsplit('/').next().expect("key").to_string();
        assert_eq!(key.len(), CALLBACK_KEY_LEN);

        let session = load_session(fs.deps().cache.as_ref(), &key)
            .await
            .expect("session");
        assert_eq!(session.uid, 1);
        assert_eq!(session.virtual_path, "/docs");
        assert_eq!(session.save_path, "uploads/1/a.txt");
    }

    #[tokio::test]
    async fn test_upload_token_checks_max_size() {
        let store = MemoryStore::with_user(100);
        let mut policy = fixtures::local_policy(1);
        policy.max_size = 5;
        store.add_policy(policy);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;

        assert!(matches!(
            fs.get_upload_token("/", 6, "a.txt").await,
            Err(FsError::FileSizeTooBig)
        ));
    }

    #[tokio::test]
    async fn test_process_callback_records_file() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        let mut fs = fixtures::fs(&store, handler.clone()).await;
        fs.get_upload_token("/photos", 4, "cat.png").await.expect("token");

        let session = UploadSession {
            key: "k".repeat(32),
            uid: 1,
            policy_id: 1,
            virtual_path: "/photos".to_string(),
            name: "cat.png".to_string(),
            size: 4,
            save_path: "uploads/1/cat.png".to_string(),
        };
        handler.insert(&session.save_path, b"meow");

        let mut fs = fixtures::fs(&store, handler).await;
        let file = fs
            .process_callback(
                &session,
                CallbackBody {
                    pic_info: "10,20".to_string(),
                    size: 4,
                    ..CallbackBody::default()
                },
            )
            .await
            .expect("callback");

        assert_eq!(file.source_name, "uploads/1/cat.png");
        assert_eq!(store.file(file.id).map(|f| f.pic_info), Some("10,20".to_string()));
        assert_eq!(store.user(1).storage, 4);
    }

    #[tokio::test]
    async fn test_process_callback_over_quota_removes_object() {
        let store = MemoryStore::with_user(3);
        let handler = MemoryHandler::new();
        handler.insert("remote/big.bin", b"toolarge");
        let session = UploadSession {
            key: "x".repeat(32),
            uid: 1,
            policy_id: 1,
            virtual_path: "/".to_string(),
            name: "big.bin".to_string(),
            size: 8,
            save_path: "remote/big.bin".to_string(),
        };

        let mut fs = fixtures::fs(&store, handler.clone()).await;
        let err = fs
            .process_callback(
                &session,
                CallbackBody {
                    size: 8,
                    ..CallbackBody::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::InsufficientCapacity));
        assert!(handler.object("remote/big.bin").is_none());
        assert!(store.files().is_empty());
    }

    fn object_session(size: u64) -> UploadSession {
        UploadSession {
            key: "o".repeat(32),
            uid: 1,
            policy_id: 1,
            virtual_path: "/".to_string(),
            name: "a.txt".to_string(),
            size,
            save_path: "1/a.txt".to_string(),
        }
    }

    #[tokio::test]
    async fn test_verify_stored_object_charges_declared_size() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("1/a.txt", b"0123456789");
        handler.set_etag("1/a.txt", "abc");
        let session = object_session(10);

        let mut fs = fixtures::fs(&store, handler).await;
        let body = fs
            .verify_stored_object(&session, "\"abc\"")
            .await
            .expect("verified");
        assert_eq!(body.size, 10);
        assert_eq!(body.source_name, "1/a.txt");

        let file = fs.process_callback(&session, body).await.expect("callback");
        assert_eq!(file.size, 10);
        assert_eq!(store.user(1).storage, 10);
    }

    #[tokio::test]
    async fn test_verify_stored_object_rejects_size_mismatch() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        // Declared 1 byte, wrote 10.
        handler.insert("1/a.txt", b"0123456789");
        let session = object_session(1);

        let mut fs = fixtures::fs(&store, handler.clone()).await;
        let err = fs.verify_stored_object(&session, "").await.unwrap_err();

        assert!(matches!(err, FsError::ObjectMismatch(_)));
        assert!(handler.object("1/a.txt").is_none());
        assert!(store.files().is_empty());
        assert_eq!(store.user(1).storage, 0);
    }

    #[tokio::test]
    async fn test_verify_stored_object_rejects_etag_mismatch() {
        let store = MemoryStore::with_user(100);
        let handler = MemoryHandler::new();
        handler.insert("1/a.txt", b"0123456789");
        handler.set_etag("1/a.txt", "stored");

        let mut fs = fixtures::fs(&store, handler).await;
        let err = fs
            .verify_stored_object(&object_session(10), "forged")
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::ObjectMismatch(_)));
    }

    #[tokio::test]
    async fn test_verify_stored_object_missing() {
        let store = MemoryStore::with_user(100);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;
        let err = fs
            .verify_stored_object(&object_session(10), "")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::filesystem::ErrorKind::NotFound);
    }
}
