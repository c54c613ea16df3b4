//! Policy dispatch: maps a policy's type tag to its handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::{DriverError, Handler, HandlerFactory, LocalHandler, ObjectHandler, RemoteHandler};
use crate::auth::HmacSigner;
use crate::cache::CacheStore;
use crate::model::{Policy, PolicyType};

/// Process-wide values every handler may need.
#[derive(Clone)]
pub struct DriverContext {
    /// Root directory of `local` policies.
    pub upload_root: PathBuf,
    /// Public base URL of this server.
    pub site_url: Url,
    /// Signer for links served by this server.
    pub signer: HmacSigner,
    /// Session store for download links.
    pub cache: Arc<dyn CacheStore>,
    /// Suffix of stored thumbnails.
    pub thumb_suffix: String,
    /// Timeout and signature lifetime for peer API calls.
    pub slave_api_timeout: Duration,
    /// Lifetime of peer upload credentials, in seconds.
    pub upload_credential_timeout: i64,
    /// Lifetime of thumbnail links, in seconds.
    pub preview_timeout: i64,
}

impl DriverContext {
    /// Creates a context with default timeouts.
    #[must_use]
    pub fn new(
        upload_root: impl AsRef<Path>,
        site_url: Url,
        signer: HmacSigner,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            upload_root: upload_root.as_ref().to_path_buf(),
            site_url,
            signer,
            cache,
            thumb_suffix: "._thumb".to_string(),
            slave_api_timeout: Duration::from_secs(60),
            upload_credential_timeout: 3600,
            preview_timeout: 60,
        }
    }

    /// Overrides the thumbnail suffix.
    #[must_use]
    pub fn with_thumb_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.thumb_suffix = suffix.into();
        self
    }

    /// Overrides the timeouts read from settings.
    #[must_use]
    pub fn with_timeouts(
        mut self,
        slave_api_timeout: Duration,
        upload_credential_timeout: i64,
        preview_timeout: i64,
    ) -> Self {
        self.slave_api_timeout = slave_api_timeout;
        self.upload_credential_timeout = upload_credential_timeout;
        self.preview_timeout = preview_timeout;
        self
    }
}

/// Builds the handler matching a policy's type tag.
#[derive(Clone)]
pub struct PolicyDispatcher {
    ctx: DriverContext,
}

impl PolicyDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }
}

impl HandlerFactory for PolicyDispatcher {
    fn build(&self, policy: &Policy) -> Result<Arc<dyn Handler>, DriverError> {
        let kind = policy
            .kind()
            .ok_or_else(|| DriverError::UnknownPolicyType(policy.policy_type.clone()))?;
        let ctx = self.ctx.clone();
        let handler: Arc<dyn Handler> = match kind {
            PolicyType::Local => Arc::new(LocalHandler::new(policy.clone(), ctx)?),
            PolicyType::Remote => Arc::new(RemoteHandler::new(policy.clone(), ctx)?),
            PolicyType::S3 | PolicyType::Azblob => Arc::new(ObjectHandler::new(policy.clone(), ctx)?),
        };
        Ok(handler)
    }
}
