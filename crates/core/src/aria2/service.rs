//! Reloadable holder of the active daemon client.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::{Aria2Client, Aria2Error, DisabledClient, Monitor, Notifier, RpcClient};
use crate::filesystem::{FileSystem, FsDeps};
use crate::model::{Download, DownloadStatus, DownloadType, NewDownload, User};
use crate::task::WorkerPool;

struct Inner {
    client: RwLock<Arc<dyn Aria2Client>>,
    enabled: AtomicBool,
    notifier: Notifier,
    deps: FsDeps,
    pool: WorkerPool,
}

/// Offline download entry point shared by the API and the monitors.
#[derive(Clone)]
pub struct Aria2Service {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Aria2Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aria2Service")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Aria2Service {
    /// Service with offline download disabled until [`Aria2Service::init`].
    #[must_use]
    pub fn new(deps: FsDeps, pool: WorkerPool) -> Self {
        Self::build(deps, pool, Arc::new(DisabledClient), false)
    }

    /// Service bound to an explicit client.
    #[must_use]
    pub fn with_client(deps: FsDeps, pool: WorkerPool, client: Arc<dyn Aria2Client>) -> Self {
        Self::build(deps, pool, client, true)
    }

    fn build(deps: FsDeps, pool: WorkerPool, client: Arc<dyn Aria2Client>, enabled: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: RwLock::new(client),
                enabled: AtomicBool::new(enabled),
                notifier: Notifier::new(),
                deps,
                pool,
            }),
        }
    }

    /// Active client.
    #[must_use]
    pub fn client(&self) -> Arc<dyn Aria2Client> {
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, client: Arc<dyn Aria2Client>, enabled: bool) {
        *self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner) = client;
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether a daemon is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Push event router.
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// File system collaborators.
    #[must_use]
    pub fn deps(&self) -> &FsDeps {
        &self.inner.deps
    }

    /// Pool finished downloads are transferred on.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// (Re)connects using the `aria2_*` settings. Any problem leaves the
    /// feature disabled. On first start, monitors are resumed for every
    /// unfinished download and their handles returned.
    pub async fn init(&self, reload: bool) -> Vec<JoinHandle<()>> {
        let settings = &self.inner.deps.settings;
        let values = settings
            .get_many(&["aria2_rpcurl", "aria2_token", "aria2_options"])
            .await;
        let timeout = settings.get_u64("aria2_call_timeout", 5).await;
        let setting = |name: &str| values.get(name).cloned().unwrap_or_default();

        let server = setting("aria2_rpcurl");
        if server.is_empty() {
            self.install(Arc::new(DisabledClient), false);
            return Vec::new();
        }

        let options = match serde_json::from_str::<Map<String, Value>>(&setting("aria2_options")) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(error = %e, "cannot parse aria2 global options");
                self.install(Arc::new(DisabledClient), false);
                return Vec::new();
            }
        };

        match RpcClient::new(&server, setting("aria2_token"), Duration::from_secs(timeout), options) {
            Ok(client) => {
                tracing::info!(endpoint = %client.endpoint(), "aria2 rpc client initialized");
                self.install(Arc::new(client), true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot initialize aria2 rpc client");
                self.install(Arc::new(DisabledClient), false);
                return Vec::new();
            }
        }

        if reload {
            return Vec::new();
        }
        match self.resume_monitors().await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(error = %e, "cannot resume download monitors");
                Vec::new()
            }
        }
    }

    /// Starts a monitor for every download still in flight.
    pub async fn resume_monitors(&self) -> Result<Vec<JoinHandle<()>>, Aria2Error> {
        let unfinished = self
            .inner
            .deps
            .repos
            .downloads
            .list_by_status(&DownloadStatus::ACTIVE)
            .await?;
        if !unfinished.is_empty() {
            tracing::info!(count = unfinished.len(), "resuming download monitors");
        }
        let mut handles = Vec::with_capacity(unfinished.len());
        for download in unfinished {
            handles.push(self.spawn_monitor(download).await);
        }
        Ok(handles)
    }

    /// Starts watching one download at the `aria2_interval` cadence.
    pub async fn spawn_monitor(&self, download: Download) -> JoinHandle<()> {
        let interval = self.inner.deps.settings.get_u64("aria2_interval", 10).await;
        Monitor::new(self.clone(), download, Duration::from_secs(interval.max(1))).spawn()
    }

    /// Queues a URL download into the user's folder `dst`.
    ///
    /// The row is inserted before the daemon call; a rejected call leaves it
    /// in `Error` with the daemon's message.
    pub async fn add_url(&self, user: &User, url: &str, dst: &str) -> Result<Download, Aria2Error> {
        let fs = FileSystem::new(self.inner.deps.clone(), user.clone())?;
        if fs.is_path_exist(dst).await?.is_none() {
            return Err(Aria2Error::DstNotExist);
        }

        let temp_root = self.inner.deps.settings.get("aria2_temp_path").await;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let dir = PathBuf::from(temp_root).join("aria2").join(nanos.to_string());

        let repo = &self.inner.deps.repos.downloads;
        let mut download = repo
            .create(NewDownload {
                download_type: DownloadType::Url,
                source: url.to_string(),
                gid: String::new(),
                parent: dir.display().to_string(),
                dst: dst.to_string(),
                user_id: user.id,
            })
            .await?;

        let mut options = Map::new();
        options.insert("dir".to_string(), Value::String(dir.display().to_string()));
        match self.client().create_task(&download, &options).await {
            Ok(gid) => download.gid = gid,
            Err(e) => {
                download.status = DownloadStatus::Error;
                download.error = e.to_string();
                repo.save(&download).await?;
                return Err(e);
            }
        }
        repo.save(&download).await?;
        tracing::info!(gid = %download.gid, user_id = user.id, "offline download queued");

        self.spawn_monitor(download.clone()).await;
        Ok(download)
    }

    /// Removes a download from the daemon. The monitor notices on its next
    /// update.
    pub async fn cancel(&self, download: &Download) -> Result<(), Aria2Error> {
        self.client().cancel(download).await
    }

    /// Restricts a torrent download to the given files.
    pub async fn select(&self, download: &Download, files: &[i64]) -> Result<(), Aria2Error> {
        self.client().select(download, files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aria2::{MockAria2Client, StatusInfo};
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};

    fn service(store: &Arc<MemoryStore>, client: MockAria2Client) -> Aria2Service {
        let deps = fixtures::deps(store, MemoryHandler::new(), std::env::temp_dir());
        Aria2Service::with_client(deps, WorkerPool::new(1), Arc::new(client))
    }

    #[tokio::test]
    async fn test_disabled_until_configured() {
        let store = MemoryStore::with_user(100);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let service = Aria2Service::new(deps, WorkerPool::new(1));

        assert!(service.init(false).await.is_empty());
        assert!(!service.is_enabled());
        let err = service.add_url(&store.user(1), "http://example.com/a.iso", "/").await;
        assert!(matches!(err, Err(Aria2Error::NotEnabled)));
    }

    #[tokio::test]
    async fn test_init_reads_settings() {
        let store = MemoryStore::with_user(100);
        store.put_setting("aria2_rpcurl", "http://127.0.0.1:6800");
        store.put_setting("aria2_options", r#"{"max-connection-per-server":"4"}"#);
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let service = Aria2Service::new(deps, WorkerPool::new(1));

        service.init(false).await;
        assert!(service.is_enabled());
    }

    #[tokio::test]
    async fn test_bad_options_disable_feature() {
        let store = MemoryStore::with_user(100);
        store.put_setting("aria2_rpcurl", "http://127.0.0.1:6800");
        store.put_setting("aria2_options", "not json");
        let deps = fixtures::deps(&store, MemoryHandler::new(), std::env::temp_dir());
        let service = Aria2Service::new(deps, WorkerPool::new(1));

        service.init(true).await;
        assert!(!service.is_enabled());
    }

    #[tokio::test]
    async fn test_add_url_records_gid_and_monitors() {
        let store = MemoryStore::with_user(100);
        store.put_setting("aria2_temp_path", "/tmp/stratus");
        let mut client = MockAria2Client::new();
        client
            .expect_create_task()
            .withf(|download, options| {
                download.source == "http://example.com/a.iso"
                    && options["dir"].as_str().is_some_and(|d| d.starts_with("/tmp/stratus/aria2/"))
            })
            .times(1)
            .returning(|_, _| Ok("gid1".to_string()));
        client.expect_status().returning(|_| {
            Ok(StatusInfo {
                gid: "gid1".to_string(),
                status: "active".to_string(),
                ..StatusInfo::default()
            })
        });
        let service = service(&store, client);

        let download = service
            .add_url(&store.user(1), "http://example.com/a.iso", "/")
            .await
            .expect("queued");

        assert_eq!(download.gid, "gid1");
        assert_eq!(store.download(download.id).map(|d| d.gid), Some("gid1".to_string()));
        assert!(service.notifier().is_subscribed("gid1"));
    }

    #[tokio::test]
    async fn test_add_url_requires_existing_folder() {
        let store = MemoryStore::with_user(100);
        let service = service(&store, MockAria2Client::new());

        let err = service
            .add_url(&store.user(1), "http://example.com/a.iso", "/missing")
            .await;
        assert!(matches!(err, Err(Aria2Error::DstNotExist)));
    }

    #[tokio::test]
    async fn test_rejected_create_marks_row() {
        let store = MemoryStore::with_user(100);
        let mut client = MockAria2Client::new();
        client.expect_create_task().returning(|_, _| {
            Err(Aria2Error::Rpc {
                code: 1,
                message: "bad uri".to_string(),
            })
        });
        let service = service(&store, client);

        let err = service.add_url(&store.user(1), "nope", "/").await;
        assert!(matches!(err, Err(Aria2Error::Rpc { .. })));
        let rows = store.downloads();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DownloadStatus::Error);
    }
}
