//! Storage handlers.
//!
//! Every backend implements [`Handler`]. Upload, delete and listing code in
//! the file system facade is written once against this trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 FileSystem (per operation)                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │          HandlerFactory::build(&Policy) -> dyn Handler       │
//! ├───────────────────┬───────────────────┬──────────────────────┤
//! │ LocalHandler      │ ObjectHandler     │ RemoteHandler        │
//! │ OpenDAL Fs        │ OpenDAL S3/Azblob │ reqwest + HMAC       │
//! └───────────────────┴───────────────────┴──────────────────────┘
//! ```

mod dispatch;
mod local;
mod object;
mod remote;

pub use dispatch::{DriverContext, PolicyDispatcher};
pub use local::LocalHandler;
pub use object::ObjectHandler;
pub use remote::RemoteHandler;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::io::ReaderStream;

use crate::model::{File, Policy};

/// Byte stream moved into or out of a handler.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Driver errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The policy's type tag has no driver.
    #[error("unknown policy type: {0}")]
    UnknownPolicyType(String),

    /// The object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The destination exists and overwrite is disabled.
    #[error("object already exists: {0}")]
    Exists(String),

    /// The backend does not support this operation.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// The policy is misconfigured.
    #[error("storage configuration error: {0}")]
    Config(String),

    /// A remote peer rejected the request.
    #[error("remote peer error: {0}")]
    Remote(String),

    /// Transport or backend failure.
    #[error("storage operation failed: {0}")]
    Io(String),
}

impl DriverError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a remote peer error.
    #[must_use]
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create an I/O error.
    #[must_use]
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

impl From<opendal::Error> for DriverError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::Unsupported => Self::Unsupported("backend"),
            ErrorKind::AlreadyExists => Self::Exists(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

/// Partial delete failure.
#[derive(Debug, Error)]
#[error("failed to delete {} objects: {source}", .failed.len())]
pub struct DeleteError {
    /// Paths that were not removed.
    pub failed: Vec<String>,
    /// Last underlying failure.
    pub source: DriverError,
}

/// Options for [`Handler::put`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Reject the write when the destination exists.
    pub disable_overwrite: bool,
}

/// Options for [`Handler::source`].
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Link lifetime in seconds, 0 for a permanent link.
    pub ttl: i64,
    /// Serve as an attachment rather than inline.
    pub is_download: bool,
    /// Speed cap in bytes per second, 0 for none.
    pub speed: i64,
    /// File the link is for.
    pub file: File,
}

/// Thumbnail or content delivery.
pub enum ContentResponse {
    /// Client should be redirected to this URL.
    Redirect(String),
    /// Bytes served through this server.
    Stream(ByteStream),
}

impl std::fmt::Debug for ContentResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Credential for a client-side upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCredential {
    /// Signature or bearer token, if the backend uses one.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub token: String,
    /// Encoded upload policy, if the backend uses one.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub policy: String,
    /// Upload URL, if different from the default endpoint.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub url: String,
    /// Where the object will be stored.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub path: String,
    /// Callback URL embedding the session key.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub callback: String,
}

/// An object found by [`Handler::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Base name.
    pub name: String,
    /// Path relative to the listed base, `/`-separated.
    pub relative_path: String,
    /// Full physical key.
    pub source: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether this is a directory.
    pub is_dir: bool,
    /// Modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Stored size and entity tag of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes.
    pub size: u64,
    /// Entity tag without surrounding quotes, when the backend reports one.
    pub etag: Option<String>,
}

/// Storage backend contract.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Writes `stream` to `dst`. The stream is consumed on every path.
    async fn put(
        &self,
        stream: ByteStream,
        dst: &str,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), DriverError>;

    /// Removes objects, reporting those that could not be removed.
    async fn delete(&self, paths: &[String]) -> Result<(), DeleteError>;

    /// Opens an object for reading.
    async fn get(&self, path: &str) -> Result<ByteStream, DriverError>;

    /// Delivers the thumbnail of an object.
    async fn thumb(&self, path: &str) -> Result<ContentResponse, DriverError>;

    /// Builds an external URL for an object.
    async fn source(&self, path: &str, opts: SourceOptions) -> Result<String, DriverError>;

    /// Issues a client-side upload credential bound to `callback_key`.
    async fn token(
        &self,
        ttl: i64,
        callback_key: &str,
        save_path: &str,
    ) -> Result<UploadCredential, DriverError>;

    /// Lists objects under `base`. The base itself is never returned.
    async fn list(&self, base: &str, recursive: bool) -> Result<Vec<ObjectInfo>, DriverError>;

    /// Reads the stored size and entity tag of an object.
    async fn meta(&self, path: &str) -> Result<ObjectMeta, DriverError>;
}

/// Selects a handler for a policy.
pub trait HandlerFactory: Send + Sync {
    /// Builds the handler for `policy`.
    fn build(&self, policy: &Policy) -> Result<Arc<dyn Handler>, DriverError>;
}

/// Strips the leading slash OpenDAL does not expect.
fn object_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Directory key with exactly one trailing slash; the root is `/`.
fn dir_key(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}

async fn stat_exists(op: &Operator, key: &str) -> Result<bool, DriverError> {
    match op.stat(key).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn operator_put(
    op: &Operator,
    stream: ByteStream,
    dst: &str,
    opts: PutOptions,
) -> Result<(), DriverError> {
    let key = object_key(dst);
    if opts.disable_overwrite && stat_exists(op, &key).await? {
        return Err(DriverError::Exists(dst.to_string()));
    }

    let mut writer = op.writer(&key).await?;
    let mut chunks = ReaderStream::new(stream);
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                abort_writer(&mut writer, dst).await;
                return Err(e.into());
            }
        };
        if let Err(e) = writer.write(chunk).await {
            abort_writer(&mut writer, dst).await;
            return Err(e.into());
        }
    }
    writer.close().await?;
    Ok(())
}

/// A failed abort can leave a partial upload behind, so it is logged.
async fn abort_writer(writer: &mut opendal::Writer, dst: &str) {
    if let Err(e) = writer.abort().await {
        tracing::warn!(path = %dst, error = %e, "failed to abort partial write");
    }
}

async fn operator_meta(op: &Operator, path: &str) -> Result<ObjectMeta, DriverError> {
    let meta = op.stat(&object_key(path)).await?;
    Ok(ObjectMeta {
        size: meta.content_length(),
        etag: meta.etag().map(normalize_etag).filter(|e| !e.is_empty()),
    })
}

/// Strips the quotes and weak prefix some backends wrap entity tags in.
#[must_use]
pub fn normalize_etag(etag: &str) -> String {
    etag.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string()
}

async fn operator_get(op: &Operator, path: &str) -> Result<ByteStream, DriverError> {
    let reader = op.reader(&object_key(path)).await?;
    let stream = reader.into_futures_async_read(..).await?;
    Ok(Box::pin(stream.compat()))
}

async fn operator_delete(op: &Operator, paths: &[String]) -> Result<(), DeleteError> {
    let mut failed = Vec::new();
    let mut last = None;
    for path in paths {
        if let Err(e) = op.delete(&object_key(path)).await {
            tracing::warn!(path = %path, error = %e, "failed to delete object");
            failed.push(path.clone());
            last = Some(DriverError::from(e));
        }
    }
    match last {
        None => Ok(()),
        Some(source) => Err(DeleteError { failed, source }),
    }
}

async fn operator_list(
    op: &Operator,
    base: &str,
    recursive: bool,
) -> Result<Vec<ObjectInfo>, DriverError> {
    let base_key = dir_key(base);
    let prefix = if base_key == "/" { "" } else { base_key.as_str() };
    let entries = op.list_with(&base_key).recursive(recursive).await?;

    let mut objects = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        if path == base_key || path.is_empty() || path == "/" {
            continue;
        }
        let is_dir = entry.metadata().mode().is_dir();
        let relative = path.strip_prefix(prefix).unwrap_or(path);
        let relative_path = relative.trim_end_matches('/').to_string();
        let name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let size = if is_dir {
            0
        } else {
            match entry.metadata().content_length() {
                0 => op.stat(path).await.map(|m| m.content_length()).unwrap_or(0),
                len => len,
            }
        };
        objects.push(ObjectInfo {
            name,
            relative_path,
            source: path.trim_end_matches('/').to_string(),
            size,
            is_dir,
            last_modified: None,
        });
    }
    Ok(objects)
}
